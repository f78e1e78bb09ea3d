//! Device directory: bonded device listing and time-boxed discovery scans.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::platform::{BlePlatform, Capability, DiscoveredDevice};
use crate::core::bluetooth::types::{DeviceDescriptor, ScanEvent};
use crate::core::error::BridgeError;

pub struct BluetoothScanner {
    platform: Arc<dyn BlePlatform>,
    scan_window: Duration,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl BluetoothScanner {
    pub fn new(platform: Arc<dyn BlePlatform>, scan_window: Duration) -> Self {
        Self {
            platform,
            scan_window,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn set_scan_window(&mut self, scan_window: Duration) {
        self.scan_window = scan_window;
    }

    /// Lists devices bonded at the OS level.
    ///
    /// Never fails: a missing permission, a disabled adapter or a platform
    /// error all yield an empty list.
    pub async fn list_bonded_devices(&self) -> Vec<DeviceDescriptor> {
        if let Err(e) = check_capability(self.platform.capability().await) {
            warn!("Not listing bonded devices: {}", e);
            return Vec::new();
        }

        let devices = match self.platform.bonded_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Error getting bonded devices: {}", e);
                return Vec::new();
            }
        };

        let descriptors: Vec<DeviceDescriptor> =
            devices.iter().filter_map(bonded_descriptor).collect();
        info!("Found {} bonded devices", descriptors.len());
        descriptors
    }

    /// Starts a discovery scan, stopping any scan already in flight.
    ///
    /// Found devices, errors and completion are reported on `events`. The scan
    /// ends by itself once the scan window elapses.
    pub async fn start_scan(
        &mut self,
        events: UnboundedSender<ScanEvent>,
    ) -> Result<(), BridgeError> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }

        if let Err(e) = check_capability(self.platform.capability().await) {
            warn!("Cannot start scan: {}", e);
            let _ = events.send(ScanEvent::Error(e.to_string()));
            let _ = events.send(ScanEvent::Finished);
            return Err(e);
        }

        let stream = match self.platform.scan().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start Bluetooth scan: {}", e);
                let _ = events.send(ScanEvent::Error(e.to_string()));
                let _ = events.send(ScanEvent::Finished);
                return Err(BridgeError::ScanFailed(e.to_string()));
            }
        };

        self.cancel_token = CancellationToken::new();
        let cancel_token = self.cancel_token.clone();
        let scan_window = self.scan_window;

        let handle = tokio::spawn(async move {
            Self::internal_scan_task(stream, events, cancel_token, scan_window).await;
        });
        self.scan_task_handle = Some(handle);

        info!("Device scan task started for {:?}.", scan_window);
        Ok(())
    }

    async fn internal_scan_task(
        mut stream: futures_util::stream::BoxStream<'static, DiscoveredDevice>,
        events: UnboundedSender<ScanEvent>,
        cancel_token: CancellationToken,
        scan_window: Duration,
    ) {
        let mut seen = HashSet::new();
        let window = tokio::time::sleep(scan_window);
        tokio::pin!(window);

        loop {
            tokio::select! {
                result = stream.next() => {
                    match result {
                        Some(device) => {
                            debug!("Found device - {:?}", device);
                            let Some(descriptor) = scanned_descriptor(&device) else {
                                continue;
                            };
                            if !seen.insert(descriptor.address.clone()) {
                                continue;
                            }
                            info!(
                                "Found device: Address: {}, Name: {}",
                                descriptor.address, descriptor.name
                            );
                            if events.send(ScanEvent::DeviceFound(descriptor)).is_err() {
                                debug!("Scan listener went away, stopping scan");
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = &mut window => {
                    info!("Scan window of {:?} elapsed.", scan_window);
                    break;
                }
                _ = cancel_token.cancelled() => {
                    info!("Scan cancelled.");
                    break;
                }
            }
        }

        let _ = events.send(ScanEvent::Finished);
    }

    /// Stops the scan in flight. Safe to call when no scan is running.
    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            debug!("Waiting for scan task to finish...");
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
            }
            info!("Bluetooth scan stopped.");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Maps the capability gate onto a typed error
pub fn check_capability(capability: Capability) -> Result<(), BridgeError> {
    match capability {
        Capability::Ready => Ok(()),
        Capability::PermissionDenied => Err(BridgeError::PermissionDenied),
        Capability::AdapterUnavailable => Err(BridgeError::AdapterUnavailable),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Bonded entries missing both name and address are dropped; an entry without
/// an address is keyed by its platform id.
fn bonded_descriptor(device: &DiscoveredDevice) -> Option<DeviceDescriptor> {
    let name = non_empty(&device.cached_name);
    let address = match non_empty(&device.address) {
        Some(address) => address,
        None if name.is_some() && !device.id.trim().is_empty() => device.id.trim(),
        None => {
            debug!("Skipping bonded device without name or address: {:?}", device);
            return None;
        }
    };
    Some(DeviceDescriptor::new(name, address, &device.id))
}

/// Scan results resolve their name from the cached name, then the
/// advertisement, then the address.
fn scanned_descriptor(device: &DiscoveredDevice) -> Option<DeviceDescriptor> {
    let address = non_empty(&device.address)
        .or_else(|| Some(device.id.trim()).filter(|id| !id.is_empty()))?;
    let name = non_empty(&device.cached_name).or_else(|| non_empty(&device.advertised_name));
    Some(DeviceDescriptor::new(name, address, &device.id))
}
