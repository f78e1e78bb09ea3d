//! The persisted "selected device" record.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::bluetooth::DeviceDescriptor;
use crate::core::dispatcher::DeviceSelection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedDevice {
    pub name: String,
    pub address: String,
}

impl From<&DeviceDescriptor> for SelectedDevice {
    fn from(device: &DeviceDescriptor) -> Self {
        Self {
            name: device.name.clone(),
            address: device.address.clone(),
        }
    }
}

/// Keeps the selected device in memory and writes every change through to
/// the config file.
#[derive(Clone)]
pub struct DeviceStore {
    config_dir: PathBuf,
    config: Arc<Mutex<AppConfig>>,
}

impl DeviceStore {
    pub fn new(config_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            config_dir,
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn config(&self) -> MutexGuard<'_, AppConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn selected(&self) -> Option<SelectedDevice> {
        self.config().selected_device.clone()
    }

    pub async fn select(&self, device: &DeviceDescriptor) -> Result<()> {
        let snapshot = {
            let mut config = self.config();
            config.selected_device = Some(SelectedDevice::from(device));
            config.clone()
        };
        snapshot.save(&self.config_dir).await?;
        info!("Selected device {} ({})", device.name, device.address);
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let snapshot = {
            let mut config = self.config();
            config.selected_device = None;
            config.clone()
        };
        snapshot.save(&self.config_dir).await?;
        info!("Device selection cleared");
        Ok(())
    }
}

impl DeviceSelection for DeviceStore {
    fn selected_address(&self) -> Option<String> {
        self.config()
            .selected_device
            .as_ref()
            .map(|device| device.address.clone())
            .filter(|address| !address.trim().is_empty())
    }
}
