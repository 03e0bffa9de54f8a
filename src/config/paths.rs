//! Path utilities for the Pausegate Agent.
//!
//! Defines standard locations for configuration, logs, and the activity
//! reporter's persistence file.

use std::path::PathBuf;

/// Base data directory for the agent.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "Pausegate", "Pausegate")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
                .join("pausegate")
        })
}

/// Configuration file path.
pub fn config_file() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("PAUSEGATE_CONFIG") {
        return PathBuf::from(path);
    }

    data_dir().join("config.toml")
}

/// Log directory.
pub fn log_dir() -> std::io::Result<PathBuf> {
    let path = data_dir().join("logs");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Default location of the local activity reporter's persistence file.
pub fn activity_file() -> PathBuf {
    data_dir().join("activity.json")
}

/// Ensure all required directories exist.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir())?;
    std::fs::create_dir_all(log_dir()?)?;
    Ok(())
}
