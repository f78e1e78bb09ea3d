//! Application state management
//! Wires the platform, the connection manager, the device directory, the
//! selected-device store and the dispatcher together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::Mutex;

use crate::config::{AppConfig, DeviceStore};
use crate::core::bluetooth::{BlePlatform, BluetoothScanner, ConnectionManager};
use crate::core::dispatcher::CommandDispatcher;

pub struct AppState {
    pub config: AppConfig,
    pub connection: ConnectionManager,
    pub scanner: Arc<Mutex<BluetoothScanner>>,
    pub devices: DeviceStore,
    pub dispatcher: CommandDispatcher,
}

impl AppState {
    /// Loads the config from `config_dir` and builds the Bluetooth stack on
    /// top of `platform`. Must be called from within a tokio runtime.
    pub async fn new(platform: Arc<dyn BlePlatform>, config_dir: PathBuf) -> Result<Self> {
        let config = AppConfig::load(&config_dir).await?;
        Ok(Self::with_config(platform, config_dir, config))
    }

    /// Builds the stack from an already loaded `config`
    pub fn with_config(
        platform: Arc<dyn BlePlatform>,
        config_dir: PathBuf,
        config: AppConfig,
    ) -> Self {
        info!("Initializing Bluetooth stack...");
        let connection = ConnectionManager::new(platform.clone(), &config.bluetooth);
        let scanner = BluetoothScanner::new(platform, config.bluetooth.scan_window());
        let devices = DeviceStore::new(config_dir, config.clone());
        let dispatcher = CommandDispatcher::new(connection.clone(), Arc::new(devices.clone()));

        Self {
            config,
            connection,
            scanner: Arc::new(Mutex::new(scanner)),
            devices,
            dispatcher,
        }
    }

    pub fn get_scanner_arc(&self) -> Arc<Mutex<BluetoothScanner>> {
        self.scanner.clone()
    }
}
