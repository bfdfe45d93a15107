//! Host configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default capacity of each instance's control-to-audio event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Host-wide configuration
///
/// Every field has a default, so a partial JSON document is accepted:
///
/// ```
/// use vst3_bridge::HostConfig;
///
/// let config = HostConfig::from_json(r#"{ "sample_rate": 48000.0 }"#).unwrap();
/// assert_eq!(config.sample_rate, 48000.0);
/// assert_eq!(config.max_block_size, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Name reported to plugins through the host application interface
    pub host_name: String,
    /// Sample rate used by `initialize_default`
    pub sample_rate: f64,
    /// Maximum block size used by `initialize_default`
    pub max_block_size: usize,
    /// Capacity of each instance's event queue
    pub event_queue_capacity: usize,
    /// Directories scanned in addition to the standard VST3 locations
    pub scan_paths: Vec<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_name: "vst3-bridge".to_string(),
            sample_rate: 44100.0,
            max_block_size: 512,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            scan_paths: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::IoFailure(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.max_block_size == 0 {
            return Err(Error::InvalidArgument(
                "max block size must be at least one frame".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::InvalidArgument(
                "event queue capacity must be at least one".to_string(),
            ));
        }
        Ok(())
    }
}
