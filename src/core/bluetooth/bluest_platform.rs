//! `BlePlatform` backed by the bluest crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::error::ErrorKind;
use bluest::{Adapter, Characteristic, Device, Service, Uuid};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::constants::LINK_POLL_INTERVAL_MS;
use crate::core::bluetooth::platform::{
    BlePlatform, Capability, DiscoveredDevice, GattLink, LinkError, WriteKind, WriteProperties,
};
use crate::core::bluetooth::types::GattStatus;
use crate::core::error::SendError;

/// Native radio access through the default bluest adapter
pub struct BluestPlatform {
    adapter: Option<Adapter>,
    /// Device handles seen so far, keyed by upper-case address
    devices: Arc<Mutex<HashMap<String, Device>>>,
    /// Bound on the on-demand scan for uncached devices
    lookup_timeout: Duration,
}

impl BluestPlatform {
    /// Opens the default adapter. A missing adapter is not an error here; it
    /// is reported through [`BlePlatform::capability`].
    ///
    /// `lookup_timeout` should match the connect timeout of the manager using
    /// this platform.
    pub async fn new(lookup_timeout: Duration) -> Self {
        let adapter = Adapter::default().await;
        match &adapter {
            Some(_) => info!("Bluetooth adapter found."),
            None => warn!("No Bluetooth adapter found"),
        }
        Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            lookup_timeout,
        }
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .as_ref()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))
    }

    fn remember(devices: &Mutex<HashMap<String, Device>>, device: &Device) -> DiscoveredDevice {
        let id = device.id().to_string();
        let address = extract_mac_address(&id);
        let key = address.clone().unwrap_or_else(|| id.clone()).to_uppercase();
        devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, device.clone());

        DiscoveredDevice {
            id,
            address,
            cached_name: device.name().ok(),
            advertised_name: None,
        }
    }

    fn cached(&self, address: &str) -> Option<Device> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address.to_uppercase())
            .cloned()
    }

    /// Scans until a device with `address` shows up
    async fn find_by_scan(&self, adapter: &Adapter, address: &str) -> Option<Device> {
        debug!("{} not in device cache, starting on-demand scan", address);
        let wanted = address.to_uppercase();
        let search = async {
            let mut scan = match adapter.scan(&[]).await {
                Ok(scan) => scan,
                Err(e) => {
                    error!("Failed to start on-demand scan: {}", e);
                    return None;
                }
            };
            while let Some(found) = scan.next().await {
                let record = Self::remember(&self.devices, &found.device);
                let key = record.address.unwrap_or(record.id).to_uppercase();
                if key == wanted {
                    return Some(found.device);
                }
            }
            None
        };

        tokio::time::timeout(self.lookup_timeout, search)
            .await
            .ok()
            .flatten()
    }
}

#[async_trait::async_trait]
impl BlePlatform for BluestPlatform {
    async fn capability(&self) -> Capability {
        let Some(adapter) = &self.adapter else {
            return Capability::AdapterUnavailable;
        };
        match adapter.is_available().await {
            Ok(true) => Capability::Ready,
            Ok(false) => Capability::AdapterUnavailable,
            Err(e) if matches!(e.kind(), ErrorKind::NotAuthorized) => Capability::PermissionDenied,
            Err(e) => {
                warn!("Error checking Bluetooth status: {}", e);
                Capability::AdapterUnavailable
            }
        }
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        let adapter = self.adapter()?;
        let mut bonded = Vec::new();
        for device in adapter.connected_devices().await? {
            if device.is_paired().await.unwrap_or(false) {
                bonded.push(Self::remember(&self.devices, &device));
            }
        }
        Ok(bonded)
    }

    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredDevice>> {
        let adapter = self.adapter()?.clone();
        let devices = self.devices.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&[]).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            loop {
                tokio::select! {
                    found = scan_stream.next() => {
                        let Some(found) = found else { break };
                        let record = DiscoveredDevice {
                            advertised_name: found.adv_data.local_name.clone(),
                            ..Self::remember(&devices, &found.device)
                        };
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            debug!("Native scan stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(anyhow!("Failed to start Bluetooth scan: {}", e)),
            Err(_) => return Err(anyhow!("Scan task ended before the scan started")),
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|device| (device, rx))
        });
        Ok(stream.boxed())
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn GattLink>, LinkError> {
        let adapter = self
            .adapter
            .clone()
            .ok_or(LinkError::Status(GattStatus::INTERNAL_ERROR))?;

        let device = match self.cached(address) {
            Some(device) => device,
            None => self
                .find_by_scan(&adapter, address)
                .await
                .ok_or(LinkError::DeviceNotFound)?,
        };

        if !device.is_connected().await {
            info!("Initiating connection to {}...", address);
            adapter
                .connect_device(&device)
                .await
                .map_err(|e| LinkError::Status(status_for(&e)))?;
        }

        Ok(Arc::new(BluestLink {
            adapter,
            device,
            services: tokio::sync::Mutex::new(Vec::new()),
        }))
    }
}

struct BluestLink {
    adapter: Adapter,
    device: Device,
    services: tokio::sync::Mutex<Vec<Service>>,
}

impl BluestLink {
    async fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, SendError> {
        let services = self.services.lock().await.clone();
        let service = services
            .iter()
            .find(|s| s.uuid() == service)
            .ok_or(SendError::ServiceNotFound)?;

        let characteristics = service.discover_characteristics().await.map_err(|e| {
            warn!("Failed to discover characteristics of {}: {}", service.uuid(), e);
            SendError::CharacteristicNotFound
        })?;

        characteristics
            .into_iter()
            .find(|c| c.uuid() == characteristic)
            .ok_or(SendError::CharacteristicNotFound)
    }
}

#[async_trait::async_trait]
impl GattLink for BluestLink {
    async fn discover_services(&self) -> GattStatus {
        match self.device.discover_services().await {
            Ok(services) => {
                for service in &services {
                    debug!("Available service: {}", service.uuid());
                }
                *self.services.lock().await = services;
                GattStatus::SUCCESS
            }
            Err(e) => {
                error!("Service discovery failed: {}", e);
                status_for(&e)
            }
        }
    }

    async fn write_properties(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<WriteProperties, SendError> {
        let characteristic = self.characteristic(service, characteristic).await?;
        let properties = characteristic
            .properties()
            .await
            .map_err(|e| SendError::WriteFailed(e.to_string()))?;
        Ok(WriteProperties {
            with_response: properties.write,
            without_response: properties.write_without_response,
        })
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), SendError> {
        let characteristic = self.characteristic(service, characteristic).await?;
        let result = match kind {
            WriteKind::WithResponse => characteristic.write(data).await,
            WriteKind::WithoutResponse => characteristic.write_without_response(data).await,
        };
        result.map_err(|e| SendError::WriteFailed(e.to_string()))
    }

    async fn closed(&self) {
        while self.device.is_connected().await {
            tokio::time::sleep(Duration::from_millis(LINK_POLL_INTERVAL_MS)).await;
        }
    }

    async fn disconnect(&self) {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            if let Err(e) = self.adapter.disconnect_device(&self.device).await {
                error!("Failed to disconnect from {}: {}", self.device.id(), e);
            }
        } else {
            debug!("Device {} not connected", self.device.id());
        }
    }
}

/// Maps a bluest error onto the closest GATT status
fn status_for(error: &bluest::Error) -> GattStatus {
    match error.kind() {
        ErrorKind::Timeout => GattStatus::LINK_TIMEOUT,
        ErrorKind::NotConnected => GattStatus::PEER_TERMINATED,
        ErrorKind::Internal => GattStatus::INTERNAL_ERROR,
        _ => GattStatus::GATT_ERROR,
    }
}

/// Pulls a MAC address out of a platform device id
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    static MAC: OnceLock<Regex> = OnceLock::new();
    let re = MAC.get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap());
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}
