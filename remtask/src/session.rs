//! Session loop: the only writer of connection state and the displayed view.
//!
//! Commands from callers and completions from worker tasks arrive on two inboxes
//! and are applied one at a time on the session task. Workers only fetch and send;
//! every mutation happens here, so no locks are needed around the view.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::coordinator::{Begin, FlightId, RefreshCoordinator, DEFAULT_POLL_INTERVAL};
use crate::error::{ActionError, FetchError, RefreshError};
use crate::fetcher::{fetch_inventory, ActionExecutor, InventoryFetcher};
use crate::gateway::ActionGateway;
use crate::state::ConnectionState;
use crate::types::{Performance, PerformanceSummary, ProcessInfo, Snapshot};
use crate::view::ReconcilingView;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between applying one result and starting the next automatic poll.
    pub poll_interval: Duration,
    /// Bound on one whole fetch (processes plus performance, including any
    /// reconnect). Elapsing surfaces as [`FetchError::Timeout`].
    pub fetch_timeout: Duration,
}

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Read model handed to the presentation layer after every applied change.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub state: ConnectionState,
    pub busy: bool,
    pub polling: bool,
    pub target: Option<String>,
    pub performance: Performance,
    pub filter: Option<String>,
    pub generation: Option<u64>,
    pub fetched_at: Option<DateTime<Local>>,
    /// Processes in the snapshot, before filtering.
    pub total: usize,
    pub visible: Vec<ProcessInfo>,
    /// `(name, count)` per name group, in the order of `visible`.
    pub groups: Vec<(String, usize)>,
}

impl Frame {
    pub fn find(&self, pid: u32) -> Option<&ProcessInfo> {
        self.visible.iter().find(|p| p.pid == pid)
    }

    /// Visible rows split into their name groups.
    pub fn grouped(&self) -> impl Iterator<Item = (&str, &[ProcessInfo])> + '_ {
        let mut rest = self.visible.as_slice();
        self.groups.iter().map(move |(name, n)| {
            let (members, tail) = rest.split_at((*n).min(rest.len()));
            rest = tail;
            (name.as_str(), members)
        })
    }
}

type RefreshReply = oneshot::Sender<Result<Arc<Snapshot>, RefreshError>>;

enum Command {
    /// Always manual; automatic polls start from the timer only.
    Refresh {
        target: Option<String>,
        reply: RefreshReply,
    },
    SetFilter {
        text: String,
        reply: oneshot::Sender<Arc<Frame>>,
    },
    Terminate {
        process: ProcessInfo,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    Shutdown,
}

struct Completion {
    flight: FlightId,
    target: String,
    result: Result<(Vec<ProcessInfo>, PerformanceSummary), FetchError>,
}

pub struct Session<F, E> {
    fetcher: Arc<F>,
    gateway: ActionGateway<E>,
    coordinator: RefreshCoordinator,
    view: ReconcilingView,
    waiters: Vec<RefreshReply>,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    frames: watch::Sender<Arc<Frame>>,
    fetch_timeout: Duration,
}

impl<F: InventoryFetcher, E: ActionExecutor> Session<F, E> {
    /// Start a session task on the current tokio runtime.
    pub fn spawn(fetcher: F, executor: E, config: SessionConfig) -> SessionHandle {
        Self::spawn_shared(Arc::new(fetcher), Arc::new(executor), config)
    }

    /// Like [`Session::spawn`], for transports that serve as both fetcher and executor.
    pub fn spawn_shared(fetcher: Arc<F>, executor: Arc<E>, config: SessionConfig) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = watch::channel(Arc::new(Frame::default()));
        let session = Session {
            fetcher,
            gateway: ActionGateway::new(executor),
            coordinator: RefreshCoordinator::new(config.poll_interval),
            view: ReconcilingView::new(),
            waiters: Vec::new(),
            commands: cmd_rx,
            completions_tx: done_tx,
            completions: done_rx,
            frames: frame_tx,
            fetch_timeout: config.fetch_timeout,
        };
        tokio::spawn(session.run());
        SessionHandle {
            commands: cmd_tx,
            frames: frame_rx,
        }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.coordinator.next_poll();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd),
                },
                Some(done) = self.completions.recv() => self.apply(done),
                _ = wait_until(deadline) => self.poll(),
            }
        }
        debug!("session stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh { target, reply } => {
                let target = target.or_else(|| self.coordinator.target().map(str::to_owned));
                match target {
                    Some(target) => self.start_refresh(target, true, Some(reply)),
                    None => {
                        let _ = reply.send(Err(RefreshError::NoTarget));
                    }
                }
                self.publish();
            }
            Command::SetFilter { text, reply } => {
                self.view.set_filter(&text);
                let _ = reply.send(self.publish());
            }
            Command::Terminate { process, reply } => {
                let gateway = self.gateway.clone();
                let current = self.view.generation();
                tokio::spawn(async move {
                    let _ = reply.send(gateway.terminate(&process, current).await);
                });
            }
            Command::Shutdown => {}
        }
    }

    fn poll(&mut self) {
        if !self.coordinator.poll_due(Instant::now()) {
            return;
        }
        if let Some(target) = self.coordinator.target().map(str::to_owned) {
            self.start_refresh(target, false, None);
            self.publish();
        }
    }

    fn start_refresh(&mut self, target: String, manual: bool, reply: Option<RefreshReply>) {
        let flight = match self.coordinator.begin(&target, manual) {
            Ok(Begin::Start(flight)) => flight,
            Ok(Begin::Join(_)) => {
                self.waiters.extend(reply);
                return;
            }
            Err(e) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };
        self.waiters.extend(reply);

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.completions_tx.clone();
        let limit = self.fetch_timeout;
        tokio::spawn(async move {
            let result = timeout(limit, fetch_inventory(&*fetcher, &target))
                .await
                .unwrap_or(Err(FetchError::Timeout(limit)));
            let _ = tx.send(Completion {
                flight,
                target,
                result,
            });
        });
    }

    fn apply(&mut self, done: Completion) {
        let outcome = match &done.result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        let Some(finished) = self.coordinator.finish(done.flight, outcome, Instant::now()) else {
            return;
        };
        let waiters = std::mem::take(&mut self.waiters);

        match done.result {
            Ok((processes, performance)) => {
                let snapshot = Arc::new(Snapshot::assemble(
                    done.flight,
                    &done.target,
                    processes,
                    performance,
                ));
                debug!(
                    generation = snapshot.generation(),
                    processes = snapshot.len(),
                    "snapshot applied"
                );
                self.view.replace(Arc::clone(&snapshot));
                self.publish();
                for w in waiters {
                    let _ = w.send(Ok(Arc::clone(&snapshot)));
                }
            }
            Err(e) => {
                self.view.clear();
                self.publish();
                if finished.manual {
                    info!(host = %done.target, error = %e, "refresh failed");
                } else {
                    warn!(host = %done.target, error = %e, "automatic refresh failed; polling stopped");
                }
                for w in waiters {
                    let _ = w.send(Err(RefreshError::Fetch(e.clone())));
                }
            }
        }
    }

    fn publish(&self) -> Arc<Frame> {
        let frame = Arc::new(Frame {
            state: self.coordinator.state().clone(),
            busy: self.coordinator.is_busy(),
            polling: self.coordinator.is_polling(),
            target: self.coordinator.target().map(str::to_owned),
            performance: self.view.performance(),
            filter: self.view.filter().map(|f| f.text().to_owned()),
            generation: self.view.generation(),
            fetched_at: self.view.snapshot().map(|s| s.fetched_at()),
            total: self.view.len(),
            visible: self.view.visible().cloned().collect(),
            groups: self
                .view
                .visible_groups()
                .into_iter()
                .map(|(name, members)| (name.to_owned(), members.len()))
                .collect(),
        });
        self.frames.send_replace(Arc::clone(&frame));
        frame
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front door to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    frames: watch::Receiver<Arc<Frame>>,
}

impl SessionHandle {
    /// Manual refresh against `target`, which becomes the polling target.
    pub async fn connect(&self, target: &str) -> Result<Arc<Snapshot>, RefreshError> {
        self.request_refresh(Some(target.to_string())).await
    }

    /// Manual refresh against the current target.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, RefreshError> {
        self.request_refresh(None).await
    }

    async fn request_refresh(&self, target: Option<String>) -> Result<Arc<Snapshot>, RefreshError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Refresh { target, reply: tx })
            .map_err(|_| RefreshError::SessionClosed)?;
        rx.await.map_err(|_| RefreshError::SessionClosed)?
    }

    /// Apply a filter and return the frame that reflects it.
    pub async fn set_filter(&self, text: &str) -> Arc<Frame> {
        let (tx, rx) = oneshot::channel();
        let sent = self.commands.send(Command::SetFilter {
            text: text.to_string(),
            reply: tx,
        });
        match (sent, rx.await) {
            (Ok(()), Ok(frame)) => frame,
            _ => self.frame(),
        }
    }

    /// Terminate a process taken from the current frame. Refreshing afterwards is
    /// up to the caller.
    pub async fn terminate(&self, process: ProcessInfo) -> Result<(), ActionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Terminate { process, reply: tx })
            .map_err(|_| ActionError::SessionClosed)?;
        rx.await.map_err(|_| ActionError::SessionClosed)?
    }

    pub fn frame(&self) -> Arc<Frame> {
        Arc::clone(&self.frames.borrow())
    }

    pub fn frames(&self) -> watch::Receiver<Arc<Frame>> {
        self.frames.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
