//! Bluetooth connection handling for the meter
//! This module owns the single link to the selected device, drives it through
//! the connection state machine and exposes the write primitive.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BluetoothConfig;
use crate::core::bluetooth::constants::{
    UPDATE_CHANNEL_CAPACITY, UUID_COMMAND_CHAR, UUID_COMMAND_SERVICE,
};
use crate::core::bluetooth::platform::{BlePlatform, Capability, GattLink};
use crate::core::bluetooth::state_machine::{self, Effect, LinkEvent};
use crate::core::bluetooth::types::{ConnectionState, ConnectionUpdate};
use crate::core::error::{BridgeError, SendError};

/// A link signal tagged with the attempt that produced it
struct AttemptEvent {
    attempt: u64,
    event: LinkEvent,
    link: Option<Arc<dyn GattLink>>,
}

/// The one session the manager may hold
#[derive(Default)]
struct Session {
    attempt: u64,
    state: ConnectionState,
    target: Option<String>,
    deadline: Option<Instant>,
    timeout: Option<CancellationToken>,
    link: Option<Arc<dyn GattLink>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn cancel_timeout(&mut self) {
        if let Some(token) = self.timeout.take() {
            token.cancel();
        }
        self.deadline = None;
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

struct Inner {
    platform: Arc<dyn BlePlatform>,
    connect_timeout: Duration,
    session: Mutex<Session>,
    /// Serializes `connect` and `disconnect` callers
    api_lock: tokio::sync::Mutex<()>,
    events: mpsc::UnboundedSender<AttemptEvent>,
    updates: broadcast::Sender<ConnectionUpdate>,
}

/// Owns at most one link and its lifecycle
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates the manager and spawns its event loop. Must be called from
    /// within a tokio runtime.
    pub fn new(platform: Arc<dyn BlePlatform>, config: &BluetoothConfig) -> Self {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let inner = Arc::new(Inner {
            platform,
            connect_timeout: config.connect_timeout(),
            session: Mutex::new(Session::default()),
            api_lock: tokio::sync::Mutex::new(()),
            events,
            updates,
        });

        tokio::spawn(Self::run_events(Arc::downgrade(&inner), event_rx));
        Self { inner }
    }

    /// Subscribes to state changes of the link
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session().state.clone()
    }

    /// Address of the device the current session targets
    pub fn target_address(&self) -> Option<String> {
        self.inner.session().target.clone()
    }

    /// When the pending connect attempt times out, if one is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.session().deadline
    }

    /// The current attempt and its state, as the last broadcast reported it
    pub fn snapshot(&self) -> ConnectionUpdate {
        Inner::update_of(&self.inner.session())
    }

    /// The attempt under way to `address`, if one is still pending
    pub fn pending_attempt(&self, address: &str) -> Option<u64> {
        let session = self.inner.session();
        let targets = session.target.as_deref() == Some(address.trim());
        (targets && session.state.is_pending()).then_some(session.attempt)
    }

    /// True once services are discovered and writes may be issued
    pub fn is_ready(&self) -> bool {
        self.inner.session().state == ConnectionState::ServicesReady
    }

    /// Starts connecting to `address`, tearing down any existing session first.
    ///
    /// Capability problems are returned directly; everything after that is
    /// reported through [`ConnectionManager::subscribe`] under the returned
    /// attempt number.
    pub async fn connect(&self, address: &str) -> Result<u64, BridgeError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(BridgeError::InvalidAddress(address.to_string()));
        }

        let _guard = self.inner.api_lock.lock().await;

        match self.inner.platform.capability().await {
            Capability::Ready => {}
            Capability::PermissionDenied => {
                warn!("Cannot connect to {}: Bluetooth permission not granted", address);
                return Err(BridgeError::PermissionDenied);
            }
            Capability::AdapterUnavailable => {
                warn!("Cannot connect to {}: Bluetooth adapter unavailable", address);
                return Err(BridgeError::AdapterUnavailable);
            }
        }

        self.inner.teardown().await;

        let mut session = self.inner.session();
        session.attempt += 1;
        let attempt = session.attempt;
        let token = CancellationToken::new();

        session.state = ConnectionState::Connecting;
        session.target = Some(address.to_string());
        session.deadline = Some(Instant::now() + self.inner.connect_timeout);
        session.timeout = Some(token.clone());
        session.tasks.push(self.inner.spawn_timeout(attempt, token));
        session.tasks.push(self.inner.spawn_connect(attempt, address.to_string()));

        info!(
            "Connecting to {} (attempt {}, timeout {:?})",
            address, attempt, self.inner.connect_timeout
        );
        self.inner.publish(&session);
        Ok(attempt)
    }

    /// Disconnects and clears the session. Safe to call in any state.
    pub async fn disconnect(&self) {
        let _guard = self.inner.api_lock.lock().await;
        self.inner.teardown().await;

        let mut session = self.inner.session();
        if session.state != ConnectionState::Disconnected {
            session.state = ConnectionState::Disconnected;
            self.inner.publish(&session);
        }
        info!("Disconnected, session cleared");
    }

    /// Writes a hex payload to the command characteristic.
    ///
    /// Only the enqueueing of the write is awaited, not its acknowledgment.
    pub async fn send_bytes(&self, payload: &str) -> Result<(), SendError> {
        let bytes = decode_payload(payload)?;

        let link = {
            let session = self.inner.session();
            if session.state != ConnectionState::ServicesReady {
                return Err(SendError::NotConnected);
            }
            session.link.clone().ok_or(SendError::NotConnected)?
        };

        let properties = link
            .write_properties(UUID_COMMAND_SERVICE, UUID_COMMAND_CHAR)
            .await?;
        let kind = properties.preferred().ok_or(SendError::WriteNotSupported)?;

        if let Err(e) = link
            .write(UUID_COMMAND_SERVICE, UUID_COMMAND_CHAR, &bytes, kind)
            .await
        {
            error!("Failed to write characteristic: {}", e);
            return Err(e);
        }

        debug!("Payload sent ({:?}): {}", kind, payload);
        Ok(())
    }

    async fn run_events(
        inner: std::sync::Weak<Inner>,
        mut event_rx: mpsc::UnboundedReceiver<AttemptEvent>,
    ) {
        while let Some(event) = event_rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.handle_event(event);
        }
        debug!("Connection event loop stopped");
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Broadcasts the current state. Called with the session locked so that
    /// observers see transitions in order.
    fn publish(&self, session: &Session) {
        // No receivers is fine, nobody is listening yet.
        let _ = self.updates.send(Self::update_of(session));
    }

    fn update_of(session: &Session) -> ConnectionUpdate {
        ConnectionUpdate {
            attempt: session.attempt,
            address: session.target.clone().unwrap_or_default(),
            state: session.state.clone(),
        }
    }

    fn handle_event(&self, event: AttemptEvent) {
        let AttemptEvent {
            attempt,
            event,
            link,
        } = event;

        let mut session = self.session();

        if attempt != session.attempt {
            debug!(
                "Dropping {:?} from superseded attempt {} (current {})",
                event, attempt, session.attempt
            );
            if let Some(link) = link {
                release(link);
            }
            return;
        }

        let Some(step) = state_machine::transition(&session.state, &event) else {
            debug!("Ignoring {:?} in state {:?}", event, session.state);
            if let Some(link) = link {
                release(link);
            }
            return;
        };

        if let Some(link) = link {
            session.link = Some(link);
        }

        info!(
            "Connection {:?} -> {:?} on {:?}",
            session.state, step.next, event
        );
        session.state = step.next;

        for effect in step.effects {
            match effect {
                Effect::CancelTimeout => session.cancel_timeout(),
                Effect::DiscoverServices => {
                    if let Some(link) = session.link.clone() {
                        let task = self.spawn_discovery(attempt, link);
                        session.tasks.push(task);
                    }
                }
                Effect::WatchLink => {
                    if let Some(link) = session.link.clone() {
                        let task = self.spawn_watch(attempt, link);
                        session.tasks.push(task);
                    }
                }
                Effect::ReleaseLink => {
                    session.cancel_timeout();
                    session.abort_tasks();
                    if let Some(link) = session.link.take() {
                        release(link);
                    }
                }
            }
        }

        self.publish(&session);

        if session.state.is_terminal() {
            session.target = None;
        }
    }

    /// Ends the current session, if any, and waits for its link to be released.
    async fn teardown(&self) {
        let link = {
            let mut session = self.session();
            session.cancel_timeout();
            session.abort_tasks();

            if session.state.is_pending() || session.state == ConnectionState::ServicesReady {
                session.state = ConnectionState::Disconnected;
                self.publish(&session);
            }
            // Bumping the attempt turns every in-flight signal stale.
            session.attempt += 1;
            session.target = None;
            session.link.take()
        };

        if let Some(link) = link {
            info!("Releasing previous link");
            link.disconnect().await;
        }
    }

    fn spawn_timeout(&self, attempt: u64, token: CancellationToken) -> JoinHandle<()> {
        let events = self.events.clone();
        let timeout = self.connect_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!("Connection attempt {} timed out after {:?}", attempt, timeout);
                    let _ = events.send(AttemptEvent {
                        attempt,
                        event: LinkEvent::TimedOut,
                        link: None,
                    });
                }
            }
        })
    }

    fn spawn_connect(&self, attempt: u64, address: String) -> JoinHandle<()> {
        let events = self.events.clone();
        let platform = self.platform.clone();
        tokio::spawn(async move {
            let (event, link) = match platform.connect(&address).await {
                Ok(link) => (LinkEvent::Connected, Some(link)),
                Err(e) => {
                    warn!("Connect to {} failed: {:?}", address, e);
                    (LinkEvent::ConnectFailed(e), None)
                }
            };
            let _ = events.send(AttemptEvent {
                attempt,
                event,
                link,
            });
        })
    }

    fn spawn_discovery(&self, attempt: u64, link: Arc<dyn GattLink>) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            info!("Connection successful, discovering services...");
            let status = link.discover_services().await;
            let _ = events.send(AttemptEvent {
                attempt,
                event: LinkEvent::ServicesDiscovered(status),
                link: None,
            });
        })
    }

    fn spawn_watch(&self, attempt: u64, link: Arc<dyn GattLink>) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            link.closed().await;
            info!("Link dropped by the device or the stack");
            let _ = events.send(AttemptEvent {
                attempt,
                event: LinkEvent::Disconnected,
                link: None,
            });
        })
    }
}

fn release(link: Arc<dyn GattLink>) {
    tokio::spawn(async move { link.disconnect().await });
}

/// Validates a hex payload and decodes it into wire bytes
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, SendError> {
    static HEX: OnceLock<Regex> = OnceLock::new();
    let hex_re = HEX.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]+$").unwrap());

    if payload.is_empty() || payload.len() % 2 != 0 || !hex_re.is_match(payload) {
        return Err(SendError::InvalidFormat(payload.to_string()));
    }
    hex::decode(payload).map_err(|_| SendError::InvalidFormat(payload.to_string()))
}
