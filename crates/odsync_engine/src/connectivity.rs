//! Network reachability signal.

use std::fmt;
use tokio::sync::watch;

/// Current network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// The remote is reachable.
    Connected,
    /// The remote is not reachable.
    Disconnected,
}

impl ConnectivityState {
    /// Returns true when connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectivityState::Connected)
    }
}

impl From<bool> for ConnectivityState {
    fn from(connected: bool) -> Self {
        if connected {
            ConnectivityState::Connected
        } else {
            ConnectivityState::Disconnected
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Connected => f.write_str("connected"),
            ConnectivityState::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Reports reachability and its changes.
pub trait ConnectivitySignal: Send + Sync {
    /// Returns the current state.
    fn current_state(&self) -> ConnectivityState;

    /// Subscribes to state changes.
    fn subscribe(&self) -> watch::Receiver<ConnectivityState>;
}

/// A connectivity signal driven by explicit calls.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<ConnectivityState>,
}

impl ManualConnectivity {
    /// Creates a signal with an initial state.
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Creates a connected signal.
    pub fn connected() -> Self {
        Self::new(ConnectivityState::Connected)
    }

    /// Creates a disconnected signal.
    pub fn disconnected() -> Self {
        Self::new(ConnectivityState::Disconnected)
    }

    /// Sets the state, notifying subscribers if it changed.
    pub fn set(&self, state: ConnectivityState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Marks the remote reachable.
    pub fn go_online(&self) {
        self.set(ConnectivityState::Connected);
    }

    /// Marks the remote unreachable.
    pub fn go_offline(&self) {
        self.set(ConnectivityState::Disconnected);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::connected()
    }
}

impl ConnectivitySignal for ManualConnectivity {
    fn current_state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}
