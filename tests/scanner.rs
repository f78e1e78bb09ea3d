mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{device, MockPlatform, METER_A, METER_B};
use meter_bridge_lib::core::bluetooth::{BluetoothScanner, Capability, DiscoveredDevice, ScanEvent};
use meter_bridge_lib::core::error::BridgeError;

fn scanner(platform: &Arc<MockPlatform>) -> BluetoothScanner {
    BluetoothScanner::new(platform.clone(), Duration::from_secs(10))
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let finished = event == ScanEvent::Finished;
        events.push(event);
        if finished {
            break;
        }
    }
    events
}

fn found(events: &[ScanEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::DeviceFound(d) => Some(d.address.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn duplicate_reports_yield_one_device_each() {
    let platform = MockPlatform::new();
    *platform.scan_records.lock().unwrap() = vec![
        (Duration::from_millis(100), device(METER_A, Some("Meter A"))),
        (Duration::from_millis(100), device(METER_B, None)),
        (Duration::from_millis(100), device(METER_A, Some("Meter A"))),
        (Duration::from_millis(100), device(METER_B, None)),
    ];
    let mut scanner = scanner(&platform);
    let (tx, mut rx) = mpsc::unbounded_channel();

    scanner.start_scan(tx).await.unwrap();
    let events = collect(&mut rx).await;

    assert_eq!(found(&events), vec![METER_A.to_string(), METER_B.to_string()]);
    let names: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::DeviceFound(d) => Some(d.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["Meter A", "Device (AA:BB:CC:00:00:02)"]);
}

#[tokio::test(start_paused = true)]
async fn scan_finishes_when_window_elapses() {
    let platform = MockPlatform::new();
    *platform.scan_records.lock().unwrap() = vec![(Duration::from_secs(1), device(METER_A, None))];
    let mut scanner = scanner(&platform);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    scanner.start_scan(tx).await.unwrap();
    assert!(scanner.is_scanning());

    let events = collect(&mut rx).await;
    assert_eq!(events.last(), Some(&ScanEvent::Finished));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(11), "{:?}", elapsed);

    tokio::task::yield_now().await;
    assert!(!scanner.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn scan_finishes_when_platform_stream_ends() {
    let platform = MockPlatform::new();
    *platform.scan_ends.lock().unwrap() = true;
    *platform.scan_records.lock().unwrap() = vec![(Duration::from_secs(1), device(METER_A, None))];
    let mut scanner = scanner(&platform);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    scanner.start_scan(tx).await.unwrap();
    let events = collect(&mut rx).await;

    assert_eq!(found(&events), vec![METER_A.to_string()]);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn restarting_stops_the_previous_scan() {
    let platform = MockPlatform::new();
    let mut scanner = scanner(&platform);

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    scanner.start_scan(first_tx).await.unwrap();

    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    scanner.start_scan(second_tx).await.unwrap();

    // The first scan was stopped before the second started.
    assert_eq!(first_rx.try_recv(), Ok(ScanEvent::Finished));
    assert!(scanner.is_scanning());
    assert_eq!(platform.log.entries(), vec!["scan", "scan"]);

    scanner.stop_scan().await;
    assert_eq!(collect(&mut second_rx).await, vec![ScanEvent::Finished]);
    assert!(!scanner.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn stop_without_scan_is_a_no_op() {
    let platform = MockPlatform::new();
    let mut scanner = scanner(&platform);
    scanner.stop_scan().await;
    scanner.stop_scan().await;
    assert!(!scanner.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn capability_errors_are_reported_on_both_channels() {
    for (capability, expected) in [
        (Capability::PermissionDenied, BridgeError::PermissionDenied),
        (Capability::AdapterUnavailable, BridgeError::AdapterUnavailable),
    ] {
        let platform = MockPlatform::new();
        platform.set_capability(capability);
        let mut scanner = scanner(&platform);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(scanner.start_scan(tx).await, Err(expected.clone()));
        assert_eq!(
            collect(&mut rx).await,
            vec![ScanEvent::Error(expected.to_string()), ScanEvent::Finished]
        );
        assert!(platform.log.entries().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn platform_scan_failure_is_a_scan_error() {
    let platform = MockPlatform::new();
    *platform.scan_error.lock().unwrap() = Some("radio busy".to_string());
    let mut scanner = scanner(&platform);
    let (tx, mut rx) = mpsc::unbounded_channel();

    assert_eq!(
        scanner.start_scan(tx).await,
        Err(BridgeError::ScanFailed("radio busy".to_string()))
    );
    assert_eq!(
        collect(&mut rx).await,
        vec![ScanEvent::Error("radio busy".to_string()), ScanEvent::Finished]
    );
}

#[tokio::test]
async fn bonded_listing_resolves_names_and_drops_anonymous_entries() {
    let platform = MockPlatform::new();
    *platform.bonded.lock().unwrap() = Ok(vec![
        device(METER_A, Some("Meter A")),
        device(METER_B, None),
        DiscoveredDevice::default(),
    ]);
    let scanner = scanner(&platform);

    let devices = scanner.list_bonded_devices().await;
    let listed: Vec<(&str, &str)> =
        devices.iter().map(|d| (d.name.as_str(), d.address.as_str())).collect();
    assert_eq!(
        listed,
        vec![("Meter A", METER_A), ("Device (AA:BB:CC:00:00:02)", METER_B)]
    );
}

#[tokio::test]
async fn bonded_listing_fails_soft() {
    let platform = MockPlatform::new();
    *platform.bonded.lock().unwrap() = Err("stack error".to_string());
    assert!(scanner(&platform).list_bonded_devices().await.is_empty());

    let platform = MockPlatform::new();
    *platform.bonded.lock().unwrap() = Ok(vec![device(METER_A, Some("Meter A"))]);
    platform.set_capability(Capability::PermissionDenied);
    assert!(scanner(&platform).list_bonded_devices().await.is_empty());
}
