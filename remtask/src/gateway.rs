//! Action gateway: one remote action per call, never touches the view.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ActionError;
use crate::fetcher::{Action, ActionExecutor};
use crate::types::ProcessInfo;

pub struct ActionGateway<E> {
    executor: Arc<E>,
}

impl<E> Clone for ActionGateway<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<E: ActionExecutor> ActionGateway<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Terminate `process`. `current_generation` is the generation of the snapshot
    /// currently displayed; handles from any other snapshot are refused locally.
    ///
    /// On success the caller is expected to refresh; this type never edits the view.
    pub async fn terminate(
        &self,
        process: &ProcessInfo,
        current_generation: Option<u64>,
    ) -> Result<(), ActionError> {
        if current_generation != Some(process.handle.generation()) {
            return Err(ActionError::StaleHandle { pid: process.pid });
        }
        let action = Action::Terminate;
        match self.executor.invoke(&process.handle, action).await {
            Ok(()) => {
                info!(pid = process.pid, name = %process.name, "{} succeeded", action.as_str());
                Ok(())
            }
            Err(e) => {
                warn!(pid = process.pid, name = %process.name, error = %e, "{} failed", action.as_str());
                Err(e)
            }
        }
    }
}
