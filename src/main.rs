//! Pausegate Agent
//!
//! Observes user activity through a backend endpoint and/or a local
//! activity file, derives the gate mode, pauses media resources while
//! the user is away, and broadcasts status updates to attached
//! receivers.

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod broadcast;
mod cli;
mod config;
mod error;
mod gate;
mod source;
mod status;
mod types;

use cli::{Cli, Command};

fn main() {
    // Wrap everything to catch errors before logging is initialized
    if let Err(e) = real_main() {
        eprintln!("Pausegate Agent startup error: {:?}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn real_main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config_path {
        std::env::set_var("PAUSEGATE_CONFIG", path);
    }

    // Run uses file logging; other commands use console
    let _guard = match &cli.command {
        Command::Run => init_file_logging(&cli)?,
        _ => init_console_logging(&cli)?,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Pausegate Agent starting"
    );

    match cli.command {
        Command::Run => cli::run::run_foreground().await,
        Command::Status => cli::status::run().await,
        Command::Config { action } => cli::config::run(action).await,
        Command::Version => {
            println!("pausegate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_console_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(None)
}

fn init_file_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    config::paths::ensure_directories()?;
    let log_dir = config::paths::log_dir()?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("pausegate")
        .filename_suffix("log")
        .max_log_files(10)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .init();

    Ok(Some(guard))
}
