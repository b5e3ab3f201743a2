//! Wire format shared with the remtask client. Requests are tagged by `op`,
//! responses by `kind`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListProcesses,
    Performance,
    Terminate { token: String },
}

#[derive(Debug, Serialize, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub mem_bytes: u64,
    pub threads: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe_path: Option<String>,
    /// `"<pid>:<start_time>"`, presented back on terminate.
    pub token: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Denied,
    NotFound,
    Stale,
    Failed,
    BadRequest,
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Processes { processes: Vec<ProcessInfo> },
    Performance { cpu_percent: f64, free_memory_mb: f64 },
    Terminated { pid: u32 },
    Error { code: ErrorCode, message: String },
}
