pub mod bluetooth;
pub mod dispatcher;
pub mod error;
pub mod payload;

pub use bluetooth::{BluetoothScanner, ConnectionManager};
pub use dispatcher::{CommandDispatcher, DeviceSelection};
pub use error::{BridgeError, PayloadError, SendError};
