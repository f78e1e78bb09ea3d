//! Bluetooth functionality for the meter bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and writing command payloads to the meter.

#[cfg(feature = "native")]
mod bluest_platform;
mod connection;
mod constants;
mod platform;
mod scanner;
pub mod state_machine;
mod types;

// Re-export types that should be publicly accessible
#[cfg(feature = "native")]
pub use bluest_platform::{extract_mac_address, BluestPlatform};
pub use connection::{decode_payload, ConnectionManager};
pub use constants::*; // Re-export all constants
pub use platform::{
    BlePlatform, Capability, DiscoveredDevice, GattLink, LinkError, WriteKind, WriteProperties,
};
pub use scanner::{check_capability, BluetoothScanner};
pub use types::{
    fallback_name, ConnectionState, ConnectionUpdate, DeviceDescriptor, FailureReason, GattStatus,
    ScanEvent,
};
