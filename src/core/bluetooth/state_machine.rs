//! Transition table of the connection lifecycle.
//!
//! `Idle -> Connecting -> Connected -> ServicesReady`, with `Disconnected` and
//! `Failed` reachable from every non-idle state. The table is pure; the
//! connection manager feeds it link signals and carries out the effects.

use crate::core::bluetooth::platform::LinkError;
use crate::core::bluetooth::types::{ConnectionState, FailureReason, GattStatus};

/// A signal from the link or the connect timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The platform reported the link up
    Connected,
    /// The platform reported the connect attempt failed
    ConnectFailed(LinkError),
    ServicesDiscovered(GattStatus),
    Disconnected,
    TimedOut,
}

/// Side effects the manager performs after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    CancelTimeout,
    DiscoverServices,
    /// Start watching the link for a drop
    WatchLink,
    /// Disconnect and drop the native handle
    ReleaseLink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ConnectionState, effects: &[Effect]) -> Option<Self> {
        Some(Self {
            next,
            effects: effects.to_vec(),
        })
    }
}

/// Computes the next state for `event`, or `None` when the event does not
/// apply in `current` and must be ignored.
pub fn transition(current: &ConnectionState, event: &LinkEvent) -> Option<Transition> {
    use ConnectionState::*;
    use Effect::*;

    match (current, event) {
        // The timer keeps running until services are ready.
        (Connecting, LinkEvent::Connected) => {
            Transition::to(Connected, &[DiscoverServices, WatchLink])
        }
        (Connecting, LinkEvent::ConnectFailed(err)) => {
            let reason = match err {
                LinkError::Status(status) => FailureReason::Gatt(*status),
                LinkError::DeviceNotFound => FailureReason::DeviceNotFound,
            };
            Transition::to(Failed(reason), &[CancelTimeout, ReleaseLink])
        }
        (Connected, LinkEvent::ServicesDiscovered(status)) if status.is_success() => {
            Transition::to(ServicesReady, &[CancelTimeout])
        }
        (Connected, LinkEvent::ServicesDiscovered(status)) => Transition::to(
            Failed(FailureReason::ServiceDiscovery(*status)),
            &[CancelTimeout, ReleaseLink],
        ),
        (Connecting | Connected | ServicesReady, LinkEvent::Disconnected) => {
            Transition::to(Disconnected, &[CancelTimeout, ReleaseLink])
        }
        (Connecting | Connected, LinkEvent::TimedOut) => {
            Transition::to(Failed(FailureReason::Timeout), &[ReleaseLink])
        }
        _ => None,
    }
}
