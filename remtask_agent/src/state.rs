//! Shared agent state: one persistent sysinfo handle plus connection settings.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::Mutex;

pub type SharedSystem = Arc<Mutex<System>>;

#[derive(Clone)]
pub struct AppState {
    // Kept across requests so CPU usage has a previous sample to diff against.
    pub sys: SharedSystem,
    pub hostname: String,
    pub auth_token: Option<String>,
    pub allow_terminate: bool,
    pub client_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(auth_token: Option<String>, allow_terminate: bool) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            sys: Arc::new(Mutex::new(sys)),
            hostname,
            auth_token,
            allow_terminate,
            client_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}
