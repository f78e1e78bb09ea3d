//! Constants used throughout the Bluetooth module
//! UUIDs of the meter's UART-style service and the default timing windows.

use uuid::Uuid;

/// The vendor UART-style service exposed by the meter
pub const UUID_COMMAND_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// The characteristic command payloads are written to
pub const UUID_COMMAND_CHAR: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Time allowed between `connect` and the link reporting connected, in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Discovery scan window in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Interval at which a native link is polled for a dropped connection, in milliseconds
pub const LINK_POLL_INTERVAL_MS: u64 = 500;

/// Capacity of the connection update broadcast channel
pub const UPDATE_CHANNEL_CAPACITY: usize = 32;
