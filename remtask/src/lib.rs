//! remtask: keeps a polled, filterable view of a remote host's processes and
//! routes terminate requests back to the host.
//!
//! The core is [`session::Session`]: one task that owns the
//! [`coordinator::RefreshCoordinator`] and the [`view::ReconcilingView`], fed by
//! an [`fetcher::InventoryFetcher`]. [`ws::WsTransport`] talks to `remtask_agent`.

pub mod access;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod format;
pub mod gateway;
pub mod logging;
pub mod profiles;
pub mod session;
pub mod state;
pub mod types;
pub mod view;
pub mod wire;
pub mod ws;

pub use error::{ActionError, AuthorizationError, FetchError, RefreshError};
pub use session::{Frame, Session, SessionConfig, SessionHandle};
pub use state::ConnectionState;
pub use types::{Performance, PerformanceSummary, ProcessHandle, ProcessInfo, Snapshot};
