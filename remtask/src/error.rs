//! Error taxonomy for fetches, actions, refreshes and the startup access gate.

use std::time::Duration;

use thiserror::Error;

/// Failure reaching or reading the remote inventory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("access denied: {0}")]
    AuthorizationDenied(String),
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The remote side refused or failed; message is passed through verbatim.
    #[error("{0}")]
    Remote(String),
    #[error("process {pid} belongs to an earlier snapshot; refresh and select it again")]
    StaleHandle { pid: u32 },
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("session closed")]
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("connection failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("a refresh of {target} is already in flight")]
    Busy { target: String },
    #[error("no target to refresh; connect first")]
    NoTarget,
    #[error("session closed")]
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("access denied: user '{user}' is not authorized to run this tool")]
    NotAuthorized { user: String },
    #[error("could not determine the current user")]
    UnknownUser,
}
