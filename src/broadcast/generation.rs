//! Generation tokens for cooperative cancellation of fan-out passes.
//!
//! A fan-out captures a token when it starts and checks it before each
//! per-receiver send; any later `begin` call invalidates all older tokens,
//! so a superseded enumeration stops at its next checkpoint instead of
//! finishing a stale delivery. Best effort only: it bounds wasted work,
//! while correctness comes from latest-payload-wins at the delivery layer.

use std::sync::atomic::{AtomicU64, Ordering};

/// A captured generation value. Valid only while it equals the guard's
/// current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationToken(u64);

/// Monotonically increasing generation counter.
#[derive(Debug, Default)]
pub struct GenerationGuard {
    current: AtomicU64,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Advance to a new generation and return its token, invalidating every
    /// previously issued token.
    pub fn begin(&self) -> GenerationToken {
        GenerationToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// True iff `token` is still the live generation.
    pub fn is_current(&self, token: GenerationToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }
}
