//! Defines shared data structures for the Bluetooth module.

use std::fmt;

/// A device found by the directory, either bonded or discovered by a scan
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceDescriptor {
    /// Human readable name, `Device (<address>)` when the platform has none
    pub name: String,
    /// Hardware address, unique per device
    pub address: String,
    /// Platform-specific identifier used to reopen the native handle
    pub id: String,
}

impl DeviceDescriptor {
    /// Creates a descriptor, synthesizing a name when none is known
    pub fn new(name: Option<&str>, address: &str, id: &str) -> Self {
        let name = match name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => fallback_name(address),
        };
        Self {
            name,
            address: address.to_string(),
            id: id.to_string(),
        }
    }
}

/// The name shown for devices that do not report one
pub fn fallback_name(address: &str) -> String {
    format!("Device ({})", address)
}

/// Low-level GATT status code reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0x00);
    pub const LINK_TIMEOUT: GattStatus = GattStatus(0x08);
    pub const PEER_TERMINATED: GattStatus = GattStatus(0x13);
    pub const INTERNAL_ERROR: GattStatus = GattStatus(0x81);
    pub const GATT_ERROR: GattStatus = GattStatus(0x85);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "success"),
            Self::LINK_TIMEOUT => write!(f, "link timeout"),
            Self::PEER_TERMINATED => write!(f, "connection terminated by peer"),
            Self::INTERNAL_ERROR => write!(f, "internal error"),
            Self::GATT_ERROR => write!(f, "GATT error"),
            GattStatus(code) => write!(f, "unknown status (0x{:02X})", code),
        }
    }
}

/// Why a connection attempt ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The link did not report connected within the connect window
    Timeout,
    /// The connect signal carried a failure status
    Gatt(GattStatus),
    /// Service discovery completed with a failure status
    ServiceDiscovery(GattStatus),
    /// The platform could not resolve the address to a device
    DeviceNotFound,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Gatt(status) => write!(f, "{}", status),
            Self::ServiceDiscovery(status) => write!(f, "service discovery failed: {}", status),
            Self::DeviceNotFound => write!(f, "device not found"),
        }
    }
}

/// Lifecycle of the single link owned by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    ServicesReady,
    Disconnected,
    Failed(FailureReason),
}

impl ConnectionState {
    /// A state no further link signal can move out of
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }

    /// An attempt is underway but not yet usable for writes
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Broadcast to every observer of the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    /// Connect attempt the state belongs to, as returned by `connect`
    pub attempt: u64,
    pub address: String,
    pub state: ConnectionState,
}

/// Progress reported by a discovery scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    DeviceFound(DeviceDescriptor),
    Error(String),
    Finished,
}
