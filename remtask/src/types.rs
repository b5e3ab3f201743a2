//! Core data model: processes, performance figures and the snapshots that carry them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Opaque capability for acting on one remote process.
///
/// The token comes from the fetcher; target and generation are stamped when the
/// snapshot is assembled, so a handle is only honoured for the snapshot it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    token: Arc<str>,
    target: Arc<str>,
    generation: u64,
}

impl ProcessHandle {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
            target: Arc::from(""),
            generation: 0,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn stamp(&mut self, target: &Arc<str>, generation: u64) {
        self.target = Arc::clone(target);
        self.generation = generation;
    }
}

// Tokens are capabilities; keep them out of logs.
impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("target", &self.target)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub mem_bytes: u64,
    pub threads: u32,
    pub exe_path: Option<String>,
    pub handle: ProcessHandle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSummary {
    pub cpu_percent: f64,
    pub free_memory_mb: f64,
}

/// Performance figures as displayed. A failed refresh always lands on `Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Performance {
    #[default]
    Unavailable,
    Available(PerformanceSummary),
}

impl Performance {
    pub fn summary(&self) -> Option<&PerformanceSummary> {
        match self {
            Performance::Available(s) => Some(s),
            Performance::Unavailable => None,
        }
    }
}

/// One atomic fetch result. Immutable once assembled.
#[derive(Debug, Clone)]
pub struct Snapshot {
    generation: u64,
    target: Arc<str>,
    fetched_at: DateTime<Local>,
    processes: Vec<ProcessInfo>,
    performance: PerformanceSummary,
}

impl Snapshot {
    pub fn assemble(
        generation: u64,
        target: &str,
        mut processes: Vec<ProcessInfo>,
        performance: PerformanceSummary,
    ) -> Self {
        let target: Arc<str> = Arc::from(target);
        for p in &mut processes {
            p.handle.stamp(&target, generation);
        }
        Self {
            generation,
            target,
            fetched_at: Local::now(),
            processes,
            performance,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn fetched_at(&self) -> DateTime<Local> {
        self.fetched_at
    }

    pub fn processes(&self) -> &[ProcessInfo] {
        &self.processes
    }

    pub fn performance(&self) -> PerformanceSummary {
        self.performance
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
