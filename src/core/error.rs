//! Error types shared by the Bluetooth link, the payload engine and the dispatcher.

use thiserror::Error;

/// Failures of the write primitive on the connection manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Payload is not an even-length hex string: {0:?}")]
    InvalidFormat(String),

    #[error("No device connected")]
    NotConnected,

    #[error("Command service not found on device")]
    ServiceNotFound,

    #[error("Command characteristic not found on device")]
    CharacteristicNotFound,

    #[error("Command characteristic does not support writes")]
    WriteNotSupported,

    #[error("Failed to write characteristic: {0}")]
    WriteFailed(String),
}

/// Failures while turning a command template into a wire payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid payload template: {0}")]
    InvalidPayload(String),

    #[error("Invalid value for parameter {key}: {reason}")]
    InvalidParameterValue { key: String, reason: String },

    #[error("Not a hex byte sequence: {0:?}")]
    InvalidPayloadFormat(String),
}

impl PayloadError {
    pub(crate) fn invalid_value(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameterValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Every error the bridge reports to its callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bluetooth permission not granted")]
    PermissionDenied,

    #[error("Bluetooth adapter is absent or disabled")]
    AdapterUnavailable,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid device address: {0:?}")]
    InvalidAddress(String),

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    #[error("Command service not found on device")]
    ServiceNotFound,

    #[error("Command characteristic not found on device")]
    CharacteristicNotFound,

    #[error("Command characteristic does not support writes")]
    WriteNotSupported,

    #[error("Failed to send payload to Bluetooth device: {0}")]
    WriteFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayloadFormat(String),

    #[error("Invalid value for parameter {key}: {reason}")]
    InvalidParameterValue { key: String, reason: String },

    #[error("No Bluetooth device selected. Please select a device in settings.")]
    NoDeviceSelected,

    #[error("Command replaced by a newer request before the device connected")]
    Superseded,

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<SendError> for BridgeError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::InvalidFormat(payload) => BridgeError::InvalidPayloadFormat(payload),
            SendError::NotConnected => BridgeError::ConnectionFailed("not connected".to_string()),
            SendError::ServiceNotFound => BridgeError::ServiceNotFound,
            SendError::CharacteristicNotFound => BridgeError::CharacteristicNotFound,
            SendError::WriteNotSupported => BridgeError::WriteNotSupported,
            SendError::WriteFailed(reason) => BridgeError::WriteFailed(reason),
        }
    }
}

impl From<PayloadError> for BridgeError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::InvalidPayload(reason) => BridgeError::InvalidPayloadFormat(reason),
            PayloadError::InvalidPayloadFormat(payload) => {
                BridgeError::InvalidPayloadFormat(payload)
            }
            PayloadError::InvalidParameterValue { key, reason } => {
                BridgeError::InvalidParameterValue { key, reason }
            }
        }
    }
}
