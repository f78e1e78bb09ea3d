//! Radio abstraction the directory and connection manager are written against.
//! The `native` feature provides a bluest implementation; tests provide scripted ones.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::core::bluetooth::types::GattStatus;
use crate::core::error::SendError;

/// Whether Bluetooth may be used right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Ready,
    PermissionDenied,
    AdapterUnavailable,
}

/// A device record as the platform reports it, before name resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: String,
    pub address: Option<String>,
    /// Name the OS remembers for the device
    pub cached_name: Option<String>,
    /// Name carried in the advertisement that produced this record
    pub advertised_name: Option<String>,
}

/// Write modes a characteristic advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteProperties {
    pub with_response: bool,
    pub without_response: bool,
}

impl WriteProperties {
    /// Preferred write kind, if any. Without-response is chosen when offered
    /// since only enqueueing is awaited.
    pub fn preferred(&self) -> Option<WriteKind> {
        if self.without_response {
            Some(WriteKind::WithoutResponse)
        } else if self.with_response {
            Some(WriteKind::WithResponse)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Why the platform could not hand back a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The connect signal arrived with a failure status
    Status(GattStatus),
    DeviceNotFound,
}

/// Entry point to the local Bluetooth stack
#[async_trait::async_trait]
pub trait BlePlatform: Send + Sync {
    /// Hardware present, adapter enabled and permission granted
    async fn capability(&self) -> Capability;

    /// Devices bonded at the OS level
    async fn bonded_devices(&self) -> anyhow::Result<Vec<DiscoveredDevice>>;

    /// Starts discovery. The scan stops when the stream is dropped.
    async fn scan(&self) -> anyhow::Result<BoxStream<'static, DiscoveredDevice>>;

    /// Opens a link to the device with the given hardware address
    async fn connect(&self, address: &str) -> Result<Arc<dyn GattLink>, LinkError>;
}

/// An open link to one remote device
#[async_trait::async_trait]
pub trait GattLink: Send + Sync {
    /// Runs service discovery and reports its completion status
    async fn discover_services(&self) -> GattStatus;

    /// Looks up the write modes of a characteristic
    async fn write_properties(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<WriteProperties, SendError>;

    /// Enqueues a write on a characteristic
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), SendError>;

    /// Resolves once the remote side or the stack drops the link
    async fn closed(&self);

    /// Disconnects and releases the native handle
    async fn disconnect(&self);
}
