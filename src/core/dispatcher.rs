//! Command dispatch
//! Turns a command template and user values into a payload and gets it onto
//! the selected device, connecting first when needed. At most one command
//! waits for a connection; a newer one replaces it and the replaced caller
//! gets [`BridgeError::Superseded`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Notify};

use crate::core::bluetooth::{
    decode_payload, ConnectionManager, ConnectionState, ConnectionUpdate, FailureReason,
};
use crate::core::error::BridgeError;
use crate::core::payload::CommandTemplate;

/// The persisted "selected device" the dispatcher connects to
pub trait DeviceSelection: Send + Sync {
    fn selected_address(&self) -> Option<String>;
}

type Reply = oneshot::Sender<Result<String, BridgeError>>;

struct PendingCommand {
    id: u64,
    /// Connect attempt whose outcome the command waits for, once known
    attempt: Option<u64>,
    address: String,
    payload: String,
    reply: Reply,
}

#[derive(Default)]
struct PendingSlot {
    next_id: u64,
    command: Option<PendingCommand>,
    /// A driver task is listening to connection updates
    driving: bool,
}

struct DispatchInner {
    connection: ConnectionManager,
    selection: Arc<dyn DeviceSelection>,
    slot: Mutex<PendingSlot>,
    /// Wakes the driver when the slot is emptied outside of it
    idle: Notify,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatchInner>,
}

impl CommandDispatcher {
    pub fn new(connection: ConnectionManager, selection: Arc<dyn DeviceSelection>) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                connection,
                selection,
                slot: Mutex::new(PendingSlot::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Builds the payload for `template` and sends it, connecting to the
    /// selected device first if no link is ready.
    ///
    /// Resolves to the final hex payload once the write is enqueued.
    pub async fn send_command(
        &self,
        template: &CommandTemplate,
        values: &HashMap<String, String>,
    ) -> Result<String, BridgeError> {
        let payload = template.build(values)?;
        decode_payload(&payload)?;
        info!("Dispatching command {:?}: {}", template.label, payload);

        if self.inner.connection.is_ready() {
            self.inner.connection.send_bytes(&payload).await?;
            return Ok(payload);
        }

        let Some(address) = self.inner.selection.selected_address() else {
            warn!("No device selected, command not sent");
            return Err(BridgeError::NoDeviceSelected);
        };

        let (reply, result) = oneshot::channel();
        let id = self.park(address.clone(), payload, reply);

        let connection = &self.inner.connection;
        let attempt = match connection.pending_attempt(&address) {
            Some(attempt) => {
                debug!("Joining connection attempt {} to {} already in flight", attempt, address);
                Ok(attempt)
            }
            None => connection.connect(&address).await,
        };

        match attempt {
            Ok(attempt) => self.inner.bind(id, attempt),
            Err(e) => {
                if let Some(command) = self.inner.take_if(id) {
                    let _ = command.reply.send(Err(e));
                }
            }
        }
        // The outcome may already be in; let the driver look at the current state.
        self.inner.idle.notify_one();

        result.await.unwrap_or_else(|_| {
            Err(BridgeError::ConnectionFailed("dispatcher stopped".to_string()))
        })
    }

    /// True while a command waits for the connection to come up
    pub fn has_pending(&self) -> bool {
        self.inner.slot().command.is_some()
    }

    /// Stores the command in the pending slot, superseding any previous one,
    /// and makes sure a driver is listening.
    fn park(&self, address: String, payload: String, reply: Reply) -> u64 {
        let mut slot = self.inner.slot();
        slot.next_id += 1;
        let id = slot.next_id;

        let displaced = slot.command.replace(PendingCommand {
            id,
            attempt: None,
            address,
            payload,
            reply,
        });
        if let Some(old) = displaced {
            info!("Pending command {} superseded by {}", old.id, id);
            let _ = old.reply.send(Err(BridgeError::Superseded));
        }

        if !slot.driving {
            slot.driving = true;
            let updates = self.inner.connection.subscribe();
            tokio::spawn(Self::drive(self.inner.clone(), updates));
        }
        id
    }

    /// Resolves pending commands from connection updates until none is left
    async fn drive(inner: Arc<DispatchInner>, mut updates: broadcast::Receiver<ConnectionUpdate>) {
        debug!("Dispatcher driver started");
        loop {
            tokio::select! {
                received = updates.recv() => match received {
                    Ok(update) => inner.resolve(&update, false).await,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Dispatcher lagged {} connection updates", skipped);
                        inner.resolve(&inner.connection.snapshot(), true).await;
                    }
                    Err(RecvError::Closed) => {
                        let command = inner.slot().command.take();
                        if let Some(command) = command {
                            let _ = command.reply.send(Err(BridgeError::ConnectionFailed(
                                "connection manager stopped".to_string(),
                            )));
                        }
                        inner.slot().driving = false;
                        break;
                    }
                },
                _ = inner.idle.notified() => {
                    inner.resolve(&inner.connection.snapshot(), true).await;
                }
            }

            let mut slot = inner.slot();
            if slot.command.is_none() {
                slot.driving = false;
                break;
            }
        }
        debug!("Dispatcher driver stopped");
    }
}

impl DispatchInner {
    fn slot(&self) -> MutexGuard<'_, PendingSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_if(&self, id: u64) -> Option<PendingCommand> {
        let mut slot = self.slot();
        if slot.command.as_ref().is_some_and(|command| command.id == id) {
            slot.command.take()
        } else {
            None
        }
    }

    /// Records the connect attempt the pending command `id` waits for
    fn bind(&self, id: u64, attempt: u64) {
        let mut slot = self.slot();
        if let Some(command) = slot.command.as_mut().filter(|command| command.id == id) {
            command.attempt = Some(attempt);
        }
    }

    /// Applies a connection update to the pending command. `current` marks a
    /// snapshot of the manager rather than a broadcast update.
    async fn resolve(&self, update: &ConnectionUpdate, current: bool) {
        let (command, state) = {
            let mut slot = self.slot();
            let outcome = slot
                .command
                .as_ref()
                .and_then(|command| command.attempt)
                .and_then(|attempt| outcome_for(attempt, update, current));
            let Some(state) = outcome else {
                return;
            };
            match slot.command.take() {
                Some(command) => (command, state),
                None => return,
            }
        };

        let result = match connection_error(&command.address, &state) {
            Some(e) => {
                warn!("Pending command {} failed: {}", command.id, e);
                Err(e)
            }
            None => {
                info!("Device {} ready, sending pending command {}", command.address, command.id);
                self.connection
                    .send_bytes(&command.payload)
                    .await
                    .map(|()| command.payload)
                    .map_err(BridgeError::from)
            }
        };
        let _ = command.reply.send(result);
    }
}

/// What `update` means for a command waiting on `attempt`, or `None` while
/// that attempt is still under way.
///
/// A snapshot showing a later attempt means the awaited one was torn down,
/// even if its own terminal update was never seen.
fn outcome_for(
    attempt: u64,
    update: &ConnectionUpdate,
    current: bool,
) -> Option<ConnectionState> {
    let settled = update.state.is_terminal() || update.state == ConnectionState::ServicesReady;
    if update.attempt == attempt && settled {
        Some(update.state.clone())
    } else if current && update.attempt > attempt {
        Some(ConnectionState::Disconnected)
    } else {
        None
    }
}

/// The error a pending command reports for a terminal connection state
fn connection_error(address: &str, state: &ConnectionState) -> Option<BridgeError> {
    match state {
        ConnectionState::Failed(FailureReason::Timeout) => Some(BridgeError::ConnectionTimeout),
        ConnectionState::Failed(FailureReason::DeviceNotFound) => {
            Some(BridgeError::DeviceNotFound(address.to_string()))
        }
        ConnectionState::Failed(reason) => Some(BridgeError::ConnectionFailed(reason.to_string())),
        ConnectionState::Disconnected => {
            Some(BridgeError::ConnectionFailed("device disconnected".to_string()))
        }
        _ => None,
    }
}
