//! Bridge configuration: timeouts, scan tuning and the passcode file
//! location, loaded from a JSON file next to the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, DEFAULT_SCAN_TIMEOUT_SECS,
    MIN_RSSI_THRESHOLD,
};
use crate::utils::ensure_directory_exists;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Ceiling for the whole connect attempt, in seconds
    pub connect_timeout_secs: u64,

    /// Ceiling for every other Bluetooth operation, in seconds
    pub operation_timeout_secs: u64,

    /// How long the demo waits for a wheel to show up, in seconds
    pub scan_timeout_secs: u64,

    /// Advertisements weaker than this are ignored
    pub min_rssi: i16,

    /// Serial-to-passcode table location
    pub passcode_file: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: BLUETOOTH_OPERATION_TIMEOUT_SECS,
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            min_rssi: MIN_RSSI_THRESHOLD,
            passcode_file: PathBuf::from("passcodes.txt"),
        }
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Loads the config from a configuration file.
    pub async fn load_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_directory_exists(parent).await?;
            }
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize bridge config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Bridge config saved to {:?}.", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("wheel-bridge-no-such-config.json");
        let config = BridgeConfig::load_config(&path).await.unwrap();
        assert_eq!(config.connect_timeout_secs, CONNECT_TIMEOUT_SECS);
        assert_eq!(config.min_rssi, MIN_RSSI_THRESHOLD);
        assert_eq!(config.passcode_file, PathBuf::from("passcodes.txt"));
    }

    #[tokio::test]
    async fn saved_config_loads_back() {
        let path = std::env::temp_dir().join(format!(
            "wheel-bridge-config-{}.json",
            std::process::id()
        ));
        let mut config = BridgeConfig::default();
        config.operation_timeout_secs = 9;
        config.min_rssi = -60;
        config.save_config(&path).await.unwrap();

        let loaded = BridgeConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded.operation_timeout_secs, 9);
        assert_eq!(loaded.operation_timeout(), Duration::from_secs(9));
        assert_eq!(loaded.min_rssi, -60);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
