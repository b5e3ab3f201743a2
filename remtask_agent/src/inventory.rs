//! Process inventory, performance figures and termination, backed by sysinfo.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, UpdateKind};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::types::{ErrorCode, ProcessInfo};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TerminateError {
    #[error("terminate requests are disabled on this agent")]
    Disabled,
    #[error("refusing to terminate the agent itself")]
    SelfTarget,
    #[error("malformed process token: {0}")]
    BadToken(String),
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("process {pid} has exited and its id was reused")]
    Stale { pid: u32 },
    #[error("could not terminate process {pid}: access denied or already exiting")]
    Failed { pid: u32 },
}

impl TerminateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TerminateError::Disabled | TerminateError::SelfTarget => ErrorCode::Denied,
            TerminateError::BadToken(_) => ErrorCode::BadRequest,
            TerminateError::NotFound { .. } => ErrorCode::NotFound,
            TerminateError::Stale { .. } => ErrorCode::Stale,
            TerminateError::Failed { .. } => ErrorCode::Failed,
        }
    }
}

pub fn process_token(pid: u32, start_time: u64) -> String {
    format!("{pid}:{start_time}")
}

pub fn parse_token(token: &str) -> Option<(u32, u64)> {
    let (pid, started) = token.split_once(':')?;
    Some((pid.parse().ok()?, started.parse().ok()?))
}

/// Every process on the host, ordered by pid. Threads listed as tasks are folded
/// into their owning process's thread count.
pub async fn collect_processes(state: &AppState) -> Vec<ProcessInfo> {
    let mut sys = state.sys.lock().await;
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .with_memory()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_tasks(),
    );
    let mut procs: Vec<ProcessInfo> = sys
        .processes()
        .values()
        .filter(|p| p.thread_kind().is_none())
        .map(|p| {
            let pid = p.pid().as_u32();
            ProcessInfo {
                pid,
                name: p.name().to_string_lossy().into_owned(),
                mem_bytes: p.memory(),
                threads: p.tasks().map_or(0, |t| t.len() as u32),
                exe_path: p.exe().map(|e| e.display().to_string()),
                token: process_token(pid, p.start_time()),
            }
        })
        .collect();
    procs.sort_by_key(|p| p.pid);
    debug!(count = procs.len(), "collected processes");
    procs
}

/// (global CPU percent, available memory in MB)
pub async fn collect_performance(state: &AppState) -> (f64, f64) {
    let mut sys = state.sys.lock().await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();
    let cpu = f64::from(sys.global_cpu_usage());
    let free_mb = sys.available_memory() as f64 / 1024.0 / 1024.0;
    (cpu, free_mb)
}

/// Kill the process behind `token` after checking it is still the same process.
pub async fn terminate(state: &AppState, token: &str) -> Result<u32, TerminateError> {
    let (pid, started) =
        parse_token(token).ok_or_else(|| TerminateError::BadToken(token.to_string()))?;
    if !state.allow_terminate {
        return Err(TerminateError::Disabled);
    }
    if pid == std::process::id() {
        return Err(TerminateError::SelfTarget);
    }

    let mut sys = state.sys.lock().await;
    let spid = Pid::from_u32(pid);
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[spid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    let process = sys.process(spid).ok_or(TerminateError::NotFound { pid })?;
    if process.start_time() != started {
        return Err(TerminateError::Stale { pid });
    }
    if process.kill() {
        info!(pid, name = %process.name().to_string_lossy(), "terminated process");
        Ok(pid)
    } else {
        warn!(pid, "kill failed");
        Err(TerminateError::Failed { pid })
    }
}
