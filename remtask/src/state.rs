//! Connection state machine, expressed as a State x Trigger table.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    RefreshStarted,
    FetchSucceeded,
    FetchFailed(String),
}

impl ConnectionState {
    /// Next state for `trigger`, or `None` when the pair is not a legal transition.
    ///
    /// Any refresh start moves to `Connecting`; only `Connecting` resolves to
    /// `Connected` or `Failed`.
    pub fn next(&self, trigger: &Trigger) -> Option<ConnectionState> {
        match (self, trigger) {
            (_, Trigger::RefreshStarted) => Some(ConnectionState::Connecting),
            (ConnectionState::Connecting, Trigger::FetchSucceeded) => {
                Some(ConnectionState::Connected)
            }
            (ConnectionState::Connecting, Trigger::FetchFailed(reason)) => {
                Some(ConnectionState::Failed(reason.clone()))
            }
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
