//! Centralized Configuration Management
//!
//! Every field has a default, so a partial TOML document (or none at all)
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{MeshError, MeshResult};
use crate::protocol::envelope::DEFAULT_INFO_LEVEL;

/// Service id advertised and discovered when none is configured
pub const DEFAULT_SERVICE_ID: &str = "nearmesh.relay.v1";

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for CSP channel buffer sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (Facade → Mesh Logic)
    pub command_buffer_size: usize,
    /// Buffer size for AppEvent channels (Mesh Logic → Presentation)
    pub app_event_buffer_size: usize,
    /// Capacity of the appended-log-entry broadcast
    pub message_log_broadcast_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            app_event_buffer_size: 64,
            message_log_broadcast_size: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Deduplication Configuration
// ----------------------------------------------------------------------------

/// How long processed message ids are remembered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Remember every id for the life of the process
    #[default]
    Unbounded,
    /// Forget ids `horizon_ms` after they were first seen locally
    Window { horizon_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub retention: RetentionPolicy,
    /// How often the runtime asks the detector to evict expired ids
    pub maintenance_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::Unbounded,
            maintenance_interval_ms: 30_000,
        }
    }
}

// ----------------------------------------------------------------------------
// Mesh Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Local origin device id, also advertised as the endpoint name
    pub device_name: String,
    pub service_id: String,
    /// Info level for messages sent without one
    pub default_info_level: String,
    pub channels: ChannelConfig,
    pub dedup: DedupConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            device_name: generate_device_name(),
            service_id: DEFAULT_SERVICE_ID.to_string(),
            default_info_level: DEFAULT_INFO_LEVEL.to_string(),
            channels: ChannelConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Defaults with a fixed device name
    pub fn for_device(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Self::default()
        }
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.dedup.retention = retention;
        self
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.device_name.trim().is_empty() {
            return Err(MeshError::config_error("Device name cannot be empty"));
        }
        if self.service_id.trim().is_empty() {
            return Err(MeshError::config_error("Service id cannot be empty"));
        }
        if self.channels.command_buffer_size == 0 {
            return Err(MeshError::config_error("Command buffer size cannot be zero"));
        }
        if self.channels.app_event_buffer_size == 0 {
            return Err(MeshError::config_error("App event buffer size cannot be zero"));
        }
        if self.channels.message_log_broadcast_size == 0 {
            return Err(MeshError::config_error(
                "Message log broadcast size cannot be zero",
            ));
        }
        if let RetentionPolicy::Window { horizon_ms: 0 } = self.dedup.retention {
            return Err(MeshError::config_error(
                "Dedup retention horizon cannot be zero",
            ));
        }
        if self.dedup.maintenance_interval_ms == 0 {
            return Err(MeshError::config_error(
                "Dedup maintenance interval cannot be zero",
            ));
        }
        Ok(())
    }
}

/// `nearmesh-` followed by eight hex digits of a random UUID
pub fn generate_device_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("nearmesh-{}", &id[..8])
}
