//! Refresh coordinator: single-flight bookkeeping, connection state and the poll deadline.
//!
//! This type performs no I/O. The session loop asks it whether a refresh may start,
//! runs the fetch on a worker, and reports the outcome back through [`RefreshCoordinator::finish`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::RefreshError;
use crate::state::{ConnectionState, Trigger};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub type FlightId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begin {
    /// A new fetch must be issued; the id doubles as the snapshot generation.
    Start(FlightId),
    /// Coalesced into the outstanding fetch.
    Join(FlightId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished {
    /// True when at least one manual caller started or joined the flight.
    pub manual: bool,
}

#[derive(Debug)]
struct Flight {
    id: FlightId,
    target: String,
    manual: bool,
}

#[derive(Debug)]
pub struct RefreshCoordinator {
    state: ConnectionState,
    interval: Duration,
    next_poll: Option<Instant>,
    flight: Option<Flight>,
    last_flight: FlightId,
    target: Option<String>,
    busy: bool,
}

impl RefreshCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            interval,
            next_poll: None,
            flight: None,
            last_flight: 0,
            target: None,
            busy: false,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Busy indicator for manual callers; automatic polls never set it.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_polling(&self) -> bool {
        self.next_poll.is_some()
    }

    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn in_flight(&self) -> Option<FlightId> {
        self.flight.as_ref().map(|f| f.id)
    }

    pub fn begin(&mut self, target: &str, manual: bool) -> Result<Begin, RefreshError> {
        if let Some(flight) = self.flight.as_mut() {
            if flight.target != target {
                return Err(RefreshError::Busy {
                    target: flight.target.clone(),
                });
            }
            flight.manual |= manual;
            if manual {
                self.busy = true;
            }
            debug!(flight = flight.id, manual, "joined outstanding refresh");
            return Ok(Begin::Join(flight.id));
        }

        self.transition(Trigger::RefreshStarted);
        // Polling resumes only once this cycle's result has been applied.
        self.next_poll = None;
        self.last_flight += 1;
        let id = self.last_flight;
        self.flight = Some(Flight {
            id,
            target: target.to_string(),
            manual,
        });
        self.target = Some(target.to_string());
        self.busy = manual;
        debug!(flight = id, host = target, manual, "refresh started");
        Ok(Begin::Start(id))
    }

    /// Due when the deadline has passed and nothing is outstanding.
    pub fn poll_due(&self, now: Instant) -> bool {
        self.flight.is_none() && self.next_poll.is_some_and(|at| now >= at)
    }

    /// Record the outcome of flight `id`. Returns `None` for a completion that does
    /// not belong to the outstanding flight.
    pub fn finish(
        &mut self,
        id: FlightId,
        outcome: Result<(), String>,
        now: Instant,
    ) -> Option<Finished> {
        if self.flight.as_ref().map(|f| f.id) != Some(id) {
            debug!(flight = id, "ignoring completion of a stale flight");
            return None;
        }
        let flight = self.flight.take()?;
        self.busy = false;
        match outcome {
            Ok(()) => {
                self.transition(Trigger::FetchSucceeded);
                self.next_poll = Some(now + self.interval);
            }
            Err(reason) => {
                self.transition(Trigger::FetchFailed(reason));
                self.next_poll = None;
            }
        }
        Some(Finished {
            manual: flight.manual,
        })
    }

    fn transition(&mut self, trigger: Trigger) {
        match self.state.next(&trigger) {
            Some(next) => {
                debug!(from = %self.state, to = %next, "connection state");
                self.state = next;
            }
            None => debug!(state = %self.state, ?trigger, "ignored illegal transition"),
        }
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_arms_polling_after_completion() {
        let mut c = RefreshCoordinator::default();
        let t0 = Instant::now();
        let Begin::Start(id) = c.begin("h", true).unwrap() else {
            panic!("expected a new flight");
        };
        assert_eq!(c.state(), &ConnectionState::Connecting);
        assert!(c.is_busy());
        assert!(!c.is_polling());

        let done = c.finish(id, Ok(()), t0).unwrap();
        assert!(done.manual);
        assert_eq!(c.state(), &ConnectionState::Connected);
        assert!(!c.is_busy());
        assert_eq!(c.next_poll(), Some(t0 + DEFAULT_POLL_INTERVAL));
        assert!(!c.poll_due(t0));
        assert!(c.poll_due(t0 + DEFAULT_POLL_INTERVAL));
    }

    #[test]
    fn failure_disarms_polling() {
        let mut c = RefreshCoordinator::default();
        let now = Instant::now();
        let Begin::Start(a) = c.begin("h", true).unwrap() else {
            panic!()
        };
        c.finish(a, Ok(()), now);
        let Begin::Start(b) = c.begin("h", false).unwrap() else {
            panic!()
        };
        assert!(!c.is_busy(), "automatic refresh must not toggle busy");
        c.finish(b, Err("unreachable".into()), now);
        assert_eq!(c.state(), &ConnectionState::Failed("unreachable".into()));
        assert!(!c.is_polling());
        assert!(!c.poll_due(now + Duration::from_secs(3600)));
    }

    #[test]
    fn same_target_joins_other_target_is_rejected() {
        let mut c = RefreshCoordinator::default();
        let Begin::Start(id) = c.begin("h", false).unwrap() else {
            panic!()
        };
        assert!(!c.is_busy());
        assert_eq!(c.begin("h", true).unwrap(), Begin::Join(id));
        assert!(c.is_busy());
        assert_eq!(
            c.begin("other", true),
            Err(RefreshError::Busy { target: "h".into() })
        );
        let done = c.finish(id, Ok(()), Instant::now()).unwrap();
        assert!(done.manual);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut c = RefreshCoordinator::default();
        let Begin::Start(id) = c.begin("h", true).unwrap() else {
            panic!()
        };
        assert!(c.finish(id + 1, Ok(()), Instant::now()).is_none());
        assert_eq!(c.in_flight(), Some(id));
        assert_eq!(c.state(), &ConnectionState::Connecting);
    }

    #[test]
    fn generations_increase() {
        let mut c = RefreshCoordinator::default();
        let now = Instant::now();
        let mut last = 0;
        for _ in 0..3 {
            let Begin::Start(id) = c.begin("h", true).unwrap() else {
                panic!()
            };
            assert!(id > last);
            last = id;
            c.finish(id, Ok(()), now);
        }
    }
}
