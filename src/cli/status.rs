//! Status command - one-shot observation and derived mode.

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::source;
use crate::status::derive_mode;
use crate::types::Observation;

/// Run the status command.
pub async fn run() -> Result<()> {
    println!();
    println!("Agent Status");
    println!("============");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            println!("Config: error loading - {}", e);
            return Ok(());
        }
    };
    println!("Config: loaded");

    let observation = fetch_observation(&config).await;

    println!();
    println!("Observation");
    println!("-----------");
    println!("Source online: {}", observation.source_online);
    println!("Active: {}", observation.active);
    println!("Disabled: {}", observation.disabled);
    match observation.last_activity_at {
        Some(at) => {
            let elapsed = (Utc::now() - at).num_seconds().max(0);
            println!("Last activity: {} ({}s ago)", at.to_rfc3339(), elapsed);
        }
        None => println!("Last activity: unknown"),
    }
    println!(
        "Timeout: {} minutes",
        observation
            .timeout_minutes
            .unwrap_or(config.gate.timeout_minutes)
    );

    println!();
    println!("Derived mode: {}", derive_mode(&observation));

    Ok(())
}

/// Poll the backend if configured, falling back to the activity file.
async fn fetch_observation(config: &Config) -> Observation {
    if let Some(endpoint) = &config.source.endpoint {
        match source::poll_once(endpoint).await {
            Ok(observation) => return observation,
            Err(e) => println!("Poll failed ({}); trying activity file", e),
        }
    }

    if let Some(path) = &config.source.activity_file {
        match source::read_activity_observation(
            std::path::Path::new(path),
            config.gate.timeout_minutes,
            Utc::now(),
        ) {
            Ok(observation) => return observation,
            Err(e) => println!("Activity file unreadable ({})", e),
        }
    }

    Observation::offline()
}
