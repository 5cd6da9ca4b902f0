use crate::error::ClassifiedError;
use crate::error::ErrorKind;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Online,
    Offline,
    /// No request has settled yet. Treated as online so the first fetch
    /// pass is never suppressed.
    Unknown,
}

/// Tracks reachability of the backend from observed request outcomes.
/// There is no platform online/offline event to listen to here, so the
/// signal is derived: network-classified failures flip the state to
/// offline, any success flips it back.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Unknown);
        Self { tx }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Retry gates treat anything but a confirmed outage as online.
    pub fn is_online(&self) -> bool {
        self.state() != ConnectionState::Offline
    }

    /// Subscribe to state transitions.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn report_success(&self) {
        self.transition(ConnectionState::Online);
    }

    pub fn report_failure(&self, error: &ClassifiedError) {
        if error.kind == ErrorKind::Network {
            self.transition(ConnectionState::Offline);
        }
    }

    fn transition(&self, next: ConnectionState) {
        self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            match next {
                ConnectionState::Offline => tracing::warn!("backend unreachable; going offline"),
                ConnectionState::Online => tracing::info!("backend reachable again"),
                ConnectionState::Unknown => {}
            }
            *state = next;
            true
        });
    }
}
