//! Configuration loading

use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::Config;

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `VODCAST_CONFIG_PATH` environment variable (explicit path)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (container mount path)
/// 4. Fall back to environment variables only
///
/// Environment variables override file values either way.
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("VODCAST_CONFIG_PATH")
        .ok()
        .into_iter()
        .chain(["config.yaml".to_string(), "/config/config.yaml".to_string()])
        .find(|p| Path::new(p).exists());

    let config = match config_path.as_deref() {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::load(Some(path)).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config from environment: {e}"))?
        }
    };

    // Fail fast on misconfiguration
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("Config validation error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    info!(
        reconciler_interval_secs = config.reconciler.interval_secs,
        scheduler_tick_secs = config.scheduler.tick_interval_secs,
        "Background job settings"
    );

    Ok(config)
}
