use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::radar::transport::{DEFAULT_CONTROL_BAUD, DEFAULT_DATA_BAUD};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: u32,

    // Serial transport
    pub control_port: String,
    pub data_port: String,
    pub control_baud: u32,
    pub data_baud: u32,
    pub read_timeout_ms: u64,

    // Radar profile sent over the control channel before capture
    pub profile_path: Option<PathBuf>,

    // Session
    /// Capture duration in seconds; 0 runs until interrupted.
    pub duration_secs: u64,
    pub status_interval_ms: u64,

    // Change-detection thresholds
    pub hr_change_threshold: f64,
    pub rr_change_threshold: f64,
    pub range_change_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            control_port: "COM5".to_string(),
            data_port: "COM6".to_string(),
            control_baud: DEFAULT_CONTROL_BAUD,
            data_baud: DEFAULT_DATA_BAUD,
            read_timeout_ms: 2000,
            profile_path: None,
            duration_secs: 30,
            status_interval_ms: 1000,
            hr_change_threshold: 2.0,
            rr_change_threshold: 1.0,
            range_change_threshold: 0.05,
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".mmwave-vitals"))
    }

    /// Default path of the persisted config file
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }
}
