use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{CONNECT_TIMEOUT_SECS, DEFAULT_SCAN_DURATION_SECS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Seconds a connection attempt may take before it fails with a timeout
    pub connect_timeout_secs: u64,

    /// Seconds a discovery scan runs before it stops by itself
    pub scan_window_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        BluetoothConfig {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            scan_window_secs: DEFAULT_SCAN_DURATION_SECS,
        }
    }
}

impl BluetoothConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs.max(1))
    }
}
