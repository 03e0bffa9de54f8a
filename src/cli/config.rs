//! Config command - configuration utilities.

use anyhow::Result;

use crate::cli::ConfigAction;
use crate::config::{self, Config};

/// Run the config command.
pub async fn run(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Validate => validate_config().await,
        ConfigAction::Show => show_config().await,
        ConfigAction::Path => show_path().await,
    }
}

async fn validate_config() -> Result<()> {
    let config_path = config::paths::config_file();

    println!();
    println!("Validating configuration...");
    println!("Path: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!("ERROR: Configuration file not found");
        println!();
        println!("Create a configuration file at:");
        println!("  {}", config_path.display());
        println!();
        println!("Or specify a custom path with --config-path");
        return Ok(());
    }

    match Config::load() {
        Ok(config) => {
            println!("Configuration is valid.");
            println!();
            println!("Summary:");
            println!(
                "  Endpoint: {}",
                config.source.endpoint.as_deref().unwrap_or("(none)")
            );
            println!(
                "  Activity file: {}",
                config.source.activity_file.as_deref().unwrap_or("(none)")
            );
            println!("  Poll interval: {}s", config.source.poll_interval_seconds);
            println!("  Timeout: {} minutes", config.gate.timeout_minutes);
        }
        Err(e) => {
            println!("ERROR: {}", e);
        }
    }

    Ok(())
}

async fn show_config() -> Result<()> {
    let config = Config::load()?;
    let rendered = toml::to_string_pretty(&config)?;
    println!("{}", rendered);
    Ok(())
}

async fn show_path() -> Result<()> {
    println!("{}", config::paths::config_file().display());
    Ok(())
}
