//! Seams to the remote host: inventory fetching and point actions.
//!
//! Implementations own the transport and must bound every call with a timeout;
//! a timeout surfaces as [`FetchError::Timeout`].

use std::future::Future;

use crate::error::{ActionError, FetchError};
use crate::types::{PerformanceSummary, ProcessHandle, ProcessInfo};

pub trait InventoryFetcher: Send + Sync + 'static {
    fn fetch_processes(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<Vec<ProcessInfo>, FetchError>> + Send;

    fn fetch_performance(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<PerformanceSummary, FetchError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Terminate,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Terminate => "terminate",
        }
    }
}

pub trait ActionExecutor: Send + Sync + 'static {
    /// Invoke `action` once against the process behind `handle`. No retries.
    fn invoke(
        &self,
        handle: &ProcessHandle,
        action: Action,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}

/// Processes first, then performance; either failure fails the whole fetch.
pub async fn fetch_inventory<F: InventoryFetcher + ?Sized>(
    fetcher: &F,
    target: &str,
) -> Result<(Vec<ProcessInfo>, PerformanceSummary), FetchError> {
    let processes = fetcher.fetch_processes(target).await?;
    let performance = fetcher.fetch_performance(target).await?;
    Ok((processes, performance))
}
