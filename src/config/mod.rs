pub mod bluetooth_config;
pub mod device_store;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::utils::ensure_directory_exists;

pub use bluetooth_config::BluetoothConfig;
pub use device_store::{DeviceStore, SelectedDevice};

const APP_DIR_NAME: &str = "meter-bridge";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bluetooth: BluetoothConfig,
    pub selected_device: Option<SelectedDevice>,
}

/// `meter-bridge` under the platform's config directory
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| anyhow!("No config directory on this platform"))
}

impl AppConfig {
    /// Loads the config from `config_dir`, falling back to defaults when the
    /// file does not exist yet.
    pub async fn load(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::DeviceDescriptor;
    use crate::core::dispatcher::DeviceSelection;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bluetooth.connect_timeout_secs, 15);
        assert_eq!(config.bluetooth.scan_window_secs, 10);
    }

    #[tokio::test]
    async fn save_creates_directory_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("meter-bridge");

        let config = AppConfig {
            bluetooth: BluetoothConfig {
                connect_timeout_secs: 20,
                scan_window_secs: 5,
            },
            selected_device: Some(SelectedDevice {
                name: "Meter 7".to_string(),
                address: "C8:FD:19:01:02:03".to_string(),
            }),
        };
        config.save(&nested).await.unwrap();

        assert_eq!(AppConfig::load(&nested).await.unwrap(), config);
    }

    #[tokio::test]
    async fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let partial = r#"{ "bluetooth": { "scan_window_secs": 3 } }"#;
        fs::write(dir.path().join(CONFIG_FILE_NAME), partial).await.unwrap();

        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.bluetooth.scan_window_secs, 3);
        assert_eq!(config.bluetooth.connect_timeout_secs, 15);
        assert!(config.selected_device.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "{ nope").await.unwrap();
        assert!(AppConfig::load(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn device_store_persists_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::new(dir.path().to_path_buf(), AppConfig::default());
        assert_eq!(store.selected_address(), None);

        let meter =
            DeviceDescriptor::new(Some("Meter"), "AA:BB:CC:DD:EE:FF", "hci0/AA:BB:CC:DD:EE:FF");
        store.select(&meter).await.unwrap();
        assert_eq!(store.selected_address().as_deref(), Some("AA:BB:CC:DD:EE:FF"));

        let reloaded = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.selected_device.unwrap().name, "Meter");

        store.clear().await.unwrap();
        assert_eq!(store.selected(), None);
        assert!(AppConfig::load(dir.path()).await.unwrap().selected_device.is_none());
    }
}
