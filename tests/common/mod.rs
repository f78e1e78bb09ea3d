//! Scripted in-memory radio for driving the bridge in tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use meter_bridge_lib::config::BluetoothConfig;
use meter_bridge_lib::core::bluetooth::{
    BlePlatform, Capability, ConnectionManager, ConnectionState, ConnectionUpdate,
    DiscoveredDevice, GattLink, GattStatus, LinkError, WriteKind, WriteProperties,
};
use meter_bridge_lib::core::error::SendError;

pub const METER_A: &str = "AA:BB:CC:00:00:01";
pub const METER_B: &str = "AA:BB:CC:00:00:02";

/// How a connect call to one address plays out
#[derive(Clone, Debug)]
pub struct ConnectPlan {
    pub delay: Duration,
    /// `None` never answers
    pub outcome: Option<Result<(), LinkError>>,
    pub discovery_delay: Duration,
    pub discovery: GattStatus,
    /// What looking up the command characteristic yields
    pub properties: Result<WriteProperties, SendError>,
    pub write_result: Result<(), SendError>,
}

impl Default for ConnectPlan {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            outcome: Some(Ok(())),
            discovery_delay: Duration::from_millis(100),
            discovery: GattStatus::SUCCESS,
            properties: Ok(WriteProperties {
                with_response: true,
                without_response: true,
            }),
            write_result: Ok(()),
        }
    }
}

impl ConnectPlan {
    pub fn failing(error: LinkError) -> Self {
        Self {
            outcome: Some(Err(error)),
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            outcome: None,
            ..Default::default()
        }
    }
}

/// Shared, ordered record of what the platform was asked to do
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

pub struct MockPlatform {
    pub capability: Mutex<Capability>,
    pub bonded: Mutex<Result<Vec<DiscoveredDevice>, String>>,
    /// Records emitted by the next scan, each after its delay
    pub scan_records: Mutex<Vec<(Duration, DiscoveredDevice)>>,
    /// Whether the scan stream ends after the last record
    pub scan_ends: Mutex<bool>,
    pub scan_error: Mutex<Option<String>>,
    pub plans: Mutex<HashMap<String, ConnectPlan>>,
    pub links: Mutex<HashMap<String, Arc<MockLink>>>,
    pub log: EventLog,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            capability: Mutex::new(Capability::Ready),
            bonded: Mutex::new(Ok(Vec::new())),
            scan_records: Mutex::new(Vec::new()),
            scan_ends: Mutex::new(false),
            scan_error: Mutex::new(None),
            plans: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            log: EventLog::default(),
        })
    }

    pub fn set_capability(&self, capability: Capability) {
        *self.capability.lock().unwrap() = capability;
    }

    pub fn plan(&self, address: &str, plan: ConnectPlan) {
        self.plans.lock().unwrap().insert(address.to_string(), plan);
    }

    pub fn link(&self, address: &str) -> Option<Arc<MockLink>> {
        self.links.lock().unwrap().get(address).cloned()
    }

    pub fn connects(&self) -> usize {
        self.log.entries().iter().filter(|e| e.starts_with("connect ")).count()
    }
}

pub fn device(address: &str, name: Option<&str>) -> DiscoveredDevice {
    DiscoveredDevice {
        id: format!("hci0/dev_{}", address.replace(':', "_")),
        address: Some(address.to_string()),
        cached_name: name.map(str::to_string),
        advertised_name: None,
    }
}

#[async_trait::async_trait]
impl BlePlatform for MockPlatform {
    async fn capability(&self) -> Capability {
        *self.capability.lock().unwrap()
    }

    async fn bonded_devices(&self) -> anyhow::Result<Vec<DiscoveredDevice>> {
        self.bonded.lock().unwrap().clone().map_err(anyhow::Error::msg)
    }

    async fn scan(&self) -> anyhow::Result<BoxStream<'static, DiscoveredDevice>> {
        if let Some(e) = self.scan_error.lock().unwrap().clone() {
            return Err(anyhow::Error::msg(e));
        }
        self.log.push("scan".to_string());

        let records = self.scan_records.lock().unwrap().clone();
        let records = stream::iter(records).then(|(delay, device)| async move {
            tokio::time::sleep(delay).await;
            device
        });
        if *self.scan_ends.lock().unwrap() {
            Ok(records.boxed())
        } else {
            Ok(records.chain(stream::pending()).boxed())
        }
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn GattLink>, LinkError> {
        self.log.push(format!("connect {}", address));
        let plan = self.plans.lock().unwrap().get(address).cloned().unwrap_or_default();

        tokio::time::sleep(plan.delay).await;
        match plan.outcome.clone() {
            None => std::future::pending().await,
            Some(Err(e)) => Err(e),
            Some(Ok(())) => {
                let link = Arc::new(MockLink {
                    address: address.to_string(),
                    plan,
                    log: self.log.clone(),
                    dropped: CancellationToken::new(),
                    writes: Mutex::new(Vec::new()),
                });
                self.links.lock().unwrap().insert(address.to_string(), link.clone());
                Ok(link as Arc<dyn GattLink>)
            }
        }
    }
}

pub struct MockLink {
    pub address: String,
    plan: ConnectPlan,
    log: EventLog,
    dropped: CancellationToken,
    pub writes: Mutex<Vec<(Vec<u8>, WriteKind)>>,
}

impl MockLink {
    /// Simulates the remote side dropping the link
    pub fn drop_link(&self) {
        self.dropped.cancel();
    }

    pub fn writes(&self) -> Vec<(Vec<u8>, WriteKind)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GattLink for MockLink {
    async fn discover_services(&self) -> GattStatus {
        tokio::time::sleep(self.plan.discovery_delay).await;
        self.plan.discovery
    }

    async fn write_properties(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<WriteProperties, SendError> {
        self.plan.properties.clone()
    }

    async fn write(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), SendError> {
        self.plan.write_result.clone()?;
        self.log.push(format!("write {} {}", self.address, hex::encode_upper(data)));
        self.writes.lock().unwrap().push((data.to_vec(), kind));
        Ok(())
    }

    async fn closed(&self) {
        self.dropped.cancelled().await;
    }

    async fn disconnect(&self) {
        self.log.push(format!("disconnect {}", self.address));
    }
}

pub fn manager(platform: &Arc<MockPlatform>) -> ConnectionManager {
    ConnectionManager::new(platform.clone(), &BluetoothConfig::default())
}

/// Waits for the first update matching `pred`, failing after a minute of virtual time
pub async fn wait_for(
    updates: &mut broadcast::Receiver<ConnectionUpdate>,
    pred: impl Fn(&ConnectionUpdate) -> bool,
) -> ConnectionUpdate {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let update = updates.recv().await.expect("update channel closed");
            if pred(&update) {
                return update;
            }
        }
    })
    .await
    .expect("no matching connection update")
}

pub async fn wait_for_state(
    updates: &mut broadcast::Receiver<ConnectionUpdate>,
    state: ConnectionState,
) -> ConnectionUpdate {
    wait_for(updates, |u| u.state == state).await
}
