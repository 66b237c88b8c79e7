//! Configuration file support for mlomgrd.
//!
//! Loads and validates coordinator configuration from TOML files.
//! Default location: /etc/mlomgr/mlomgrd.toml

use crate::error::{MloError, Result};
use crate::pool::MAX_AID;
use mlo_types::LinkId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mlomgr/mlomgrd.toml";

/// Identifier pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Size of each link-local AID pool and each group's shared AID pool
    #[serde(default = "default_max_aid")]
    pub max_aid: u16,

    /// Size of the global logical-peer id bitmap
    #[serde(default = "default_max_ml_peers")]
    pub max_ml_peers: u16,
}

/// Group topology limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Maximum number of links one MLD may hold
    #[serde(default = "default_max_links_per_group")]
    pub max_links_per_group: usize,
}

/// Daemon runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Depth of the event queue
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,
}

/// Complete mlomgrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MloConfig {
    #[serde(default)]
    pub pools: PoolConfig,

    #[serde(default)]
    pub group: GroupConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

fn default_max_aid() -> u16 {
    MAX_AID
}

fn default_max_ml_peers() -> u16 {
    256
}

fn default_max_links_per_group() -> usize {
    3
}

fn default_event_queue_depth() -> usize {
    1024
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_aid: default_max_aid(),
            max_ml_peers: default_max_ml_peers(),
        }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            max_links_per_group: default_max_links_per_group(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: default_event_queue_depth(),
        }
    }
}

impl MloConfig {
    /// Load configuration from file, falling back to defaults if the file
    /// does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                MloError::Configuration(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(MloError::Io(e)),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MloError::Configuration(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pools.max_aid == 0 || self.pools.max_aid > MAX_AID {
            return Err(MloError::Configuration(format!(
                "max_aid must be 1-{}",
                MAX_AID
            )));
        }

        if self.pools.max_ml_peers == 0 {
            return Err(MloError::Configuration(
                "max_ml_peers must be > 0".to_string(),
            ));
        }

        if self.group.max_links_per_group == 0 || self.group.max_links_per_group > LinkId::COUNT {
            return Err(MloError::Configuration(format!(
                "max_links_per_group must be 1-{}",
                LinkId::COUNT
            )));
        }

        if self.daemon.event_queue_depth == 0 {
            return Err(MloError::Configuration(
                "event_queue_depth must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
