//! Bridge commands
//! This module defines the operations a front end invokes on the bridge.
//! Errors are returned as display strings, ready to show to the user.

use std::collections::HashMap;
use std::time::Duration;

use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::bluetooth::{ConnectionState, DeviceDescriptor, ScanEvent};
use crate::core::payload::{checksum, validate_binding, CommandTemplate};
use crate::state::AppState;

/// Lists devices bonded at the OS level. Empty when Bluetooth is unusable.
pub async fn list_bonded_devices(app_state: &AppState) -> Vec<DeviceDescriptor> {
    let scanner = app_state.get_scanner_arc();
    let scanner_guard = scanner.lock().await;
    scanner_guard.list_bonded_devices().await
}

/// Starts a discovery scan with updates on `events`:
/// - `DeviceFound` once per unique address
/// - `Error` if the scan cannot run
/// - `Finished` when the scan ends
pub async fn start_scan(
    app_state: &AppState,
    events: UnboundedSender<ScanEvent>,
) -> Result<(), String> {
    let scanner = app_state.get_scanner_arc();
    let mut scanner_guard = scanner.lock().await;
    scanner_guard.start_scan(events).await.map_err(|e| e.to_string())
}

/// Overrides the configured scan window for later scans
pub async fn set_scan_window(app_state: &AppState, window: Duration) {
    let scanner = app_state.get_scanner_arc();
    let mut scanner_guard = scanner.lock().await;
    scanner_guard.set_scan_window(window);
}

pub async fn stop_scan(app_state: &AppState) {
    let scanner = app_state.get_scanner_arc();
    let mut scanner_guard = scanner.lock().await;
    scanner_guard.stop_scan().await;
}

/// Persists `address` as the device commands are sent to
pub async fn select_device(
    app_state: &AppState,
    address: &str,
    name: Option<&str>,
) -> Result<DeviceDescriptor, String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(format!("Invalid device address: {:?}", address));
    }
    let device = DeviceDescriptor::new(name, address, address);
    app_state.devices.select(&device).await.map_err(|e| e.to_string())?;
    Ok(device)
}

pub async fn connect_to_device(app_state: &AppState, address: &str) -> Result<(), String> {
    app_state
        .connection
        .connect(address)
        .await
        .map(|attempt| info!("Connect attempt {} started", attempt))
        .map_err(|e| e.to_string())
}

pub async fn disconnect(app_state: &AppState) {
    app_state.connection.disconnect().await;
}

pub fn connection_state(app_state: &AppState) -> ConnectionState {
    app_state.connection.state()
}

/// Validates `values` against the command's parameters and dispatches it.
///
/// Returns the final hex payload that was written.
pub async fn send_command(
    app_state: &AppState,
    template: &CommandTemplate,
    values: &HashMap<String, String>,
) -> Result<String, String> {
    validate_binding(values, &template.parameters).map_err(|e| e.to_string())?;
    let payload = app_state
        .dispatcher
        .send_command(template, values)
        .await
        .map_err(|e| e.to_string())?;
    info!("Command {:?} sent: {}", template.label, payload);
    Ok(payload)
}

pub fn calculate_checksum(hex: &str) -> Result<String, String> {
    checksum(hex).map_err(|e| e.to_string())
}
