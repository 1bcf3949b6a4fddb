//! NearMesh CLI Configuration Management
//!
//! Configuration is layered with increasing priority:
//! defaults → TOML file → `NEARMESH_*` environment variables → command-line flags.

use std::fs;
use std::path::{Path, PathBuf};

use nearmesh_core::{MeshConfig, RetentionPolicy};
use tracing::{debug, info};

use crate::error::{CliError, Result};

/// Used when no `--config` is given and the file exists
pub const DEFAULT_CONFIG_FILE: &str = "nearmesh.toml";

pub const ENV_DEVICE_NAME: &str = "NEARMESH_DEVICE_NAME";
pub const ENV_SERVICE_ID: &str = "NEARMESH_SERVICE_ID";
pub const ENV_DEDUP_HORIZON_MS: &str = "NEARMESH_DEDUP_HORIZON_MS";

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub service_id: Option<String>,
    pub dedup_horizon_ms: Option<u64>,
}

/// Load the effective configuration from the process environment
pub fn load_configuration(overrides: &ConfigOverrides) -> Result<MeshConfig> {
    load_with_env(overrides, |key| std::env::var(key).ok())
}

/// Load the effective configuration with `env` standing in for the environment
pub fn load_with_env(
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<MeshConfig> {
    let mut config = match config_file(overrides) {
        Some(path) => load_from_file(&path)?,
        None => {
            debug!("No configuration file, using defaults");
            MeshConfig::default()
        }
    };

    apply_env(&mut config, env)?;
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<MeshConfig> {
    info!(path = %path.display(), "Loading configuration");
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Effective configuration as TOML, as printed by `nearmesh config`
pub fn render_configuration(config: &MeshConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

fn config_file(overrides: &ConfigOverrides) -> Option<PathBuf> {
    match &overrides.config_path {
        Some(path) => Some(path.clone()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}

fn apply_env(config: &mut MeshConfig, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(name) = env(ENV_DEVICE_NAME) {
        config.device_name = name;
    }
    if let Some(service_id) = env(ENV_SERVICE_ID) {
        config.service_id = service_id;
    }
    if let Some(raw) = env(ENV_DEDUP_HORIZON_MS) {
        let horizon_ms = raw.trim().parse::<u64>().map_err(|e| {
            CliError::Config(format!("{ENV_DEDUP_HORIZON_MS}='{raw}' is not a number: {e}"))
        })?;
        config.dedup.retention = RetentionPolicy::Window { horizon_ms };
    }
    Ok(())
}

fn apply_overrides(config: &mut MeshConfig, overrides: &ConfigOverrides) {
    if let Some(service_id) = &overrides.service_id {
        config.service_id = service_id.clone();
    }
    if let Some(horizon_ms) = overrides.dedup_horizon_ms {
        config.dedup.retention = RetentionPolicy::Window { horizon_ms };
    }
}
