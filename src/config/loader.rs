//! Configuration loading
//!
//! Loads and validates the NAT outbound configuration from JSON.

use std::path::Path;

use tracing::{debug, info};

use super::types::NatOutboundConfig;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<NatOutboundConfig, ConfigError> {
    let path = path.as_ref();

    debug!("Loading NAT configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config = load_config_str(&contents)?;

    info!(
        site_id = %config.site_id,
        ranges = config.virtual_ranges.len(),
        rules = config.rules.len(),
        "NAT configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<NatOutboundConfig, ConfigError> {
    let config: NatOutboundConfig =
        serde_json::from_str(json).map_err(|e| ConfigError::parse(e.to_string()))?;

    config.validate()?;

    Ok(config)
}
