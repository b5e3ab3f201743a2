//! Types that mirror the agent's JSON schema.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListProcesses,
    Performance,
    Terminate { token: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct WireProcess {
    pub pid: u32,
    pub name: String,
    pub mem_bytes: u64,
    #[serde(default)]
    pub threads: u32,
    #[serde(default)]
    pub exe_path: Option<String>,
    pub token: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Denied,
    NotFound,
    Stale,
    Failed,
    BadRequest,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Processes { processes: Vec<WireProcess> },
    Performance { cpu_percent: f64, free_memory_mb: f64 },
    Terminated { pid: u32 },
    Error { code: ErrorCode, message: String },
}
