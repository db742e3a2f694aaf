//! Run results and their observable publication.
//!
//! A [`RunnerResult`] wraps a `watch` channel holding an immutable [`RunSnapshot`].
//! The runner replaces the whole snapshot after every action, so any reader sees
//! the result list and the derived flags from the same instant.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Action;

/// Why an action counted as failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A placeholder had no binding.
    Variable,
    /// The command could not be turned into a request.
    InvalidCommand,
    /// Connection, I/O or timeout failure.
    Transport,
    /// The server answered with a non-2xx status.
    HttpStatus,
}

/// Outcome of one attempted action. Immutable once created.
#[derive(Debug, Clone)]
pub struct ActionResult {
    action: Arc<Action>,
    succeeded: bool,
    failure: Option<FailureKind>,
    status: Option<u16>,
    command: Option<String>,
    response_summary: String,
    timestamp: DateTime<Utc>,
    elapsed: Duration,
}

impl ActionResult {
    pub(crate) fn success(
        action: Arc<Action>,
        command: String,
        status: u16,
        response_summary: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            action,
            succeeded: true,
            failure: None,
            status: Some(status),
            command: Some(command),
            response_summary,
            timestamp: Utc::now(),
            elapsed,
        }
    }

    pub(crate) fn failed(
        action: Arc<Action>,
        kind: FailureKind,
        command: Option<String>,
        status: Option<u16>,
        response_summary: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            action,
            succeeded: false,
            failure: Some(kind),
            status,
            command,
            response_summary,
            timestamp: Utc::now(),
            elapsed,
        }
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Resolved command with secure values masked; `None` when resolution failed.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Status and body, or error detail. Secure values are masked.
    pub fn response_summary(&self) -> &str {
        &self.response_summary
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.succeeded { "OK  " } else { "FAIL" };
        write!(
            f,
            "[{mark}] {} ({} ms) {}",
            self.action.name,
            self.elapsed.as_millis(),
            self.response_summary
        )
    }
}

/// Where a run currently stands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    /// Every action was attempted.
    Completed,
    /// The error policy stopped the batch.
    Halted,
    /// The cancellation token fired before the batch finished.
    Cancelled,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Halted | Self::Cancelled)
    }
}

/// Consistent view of a run at one instant.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    name: String,
    total: usize,
    results: Vec<ActionResult>,
    state: RunState,
}

impl RunSnapshot {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of actions in the batch.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn results(&self) -> &[ActionResult] {
        &self.results
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// True once the batch ran to its end without a halt or cancellation.
    pub fn completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// True when every attempted action succeeded.
    pub fn completely_successful(&self) -> bool {
        self.results.iter().all(ActionResult::succeeded)
    }

    /// Success flag of each recorded result, in order.
    pub fn outcomes(&self) -> Vec<bool> {
        self.results.iter().map(ActionResult::succeeded).collect()
    }
}

impl fmt::Display for RunSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {}/{} attempted, state={:?}, completed={}, completely_successful={}",
            self.name,
            self.results.len(),
            self.total,
            self.state,
            self.completed(),
            self.completely_successful()
        )?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        Ok(())
    }
}

/// Shared handle to a run's results.
///
/// Cloning is cheap; all clones observe the same run. Only the runner that
/// created it writes to it.
#[derive(Debug, Clone)]
pub struct RunnerResult {
    tx: Arc<watch::Sender<RunSnapshot>>,
}

impl RunnerResult {
    pub(crate) fn new(name: impl Into<String>, total: usize) -> Self {
        let (tx, _rx) = watch::channel(RunSnapshot {
            name: name.into(),
            total,
            results: Vec::with_capacity(total),
            state: RunState::Pending,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> RunSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every change.
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.tx.subscribe()
    }

    pub fn completed(&self) -> bool {
        self.tx.borrow().completed()
    }

    pub fn completely_successful(&self) -> bool {
        self.tx.borrow().completely_successful()
    }

    pub(crate) fn set_state(&self, state: RunState) {
        self.tx.send_modify(|snap| {
            if !snap.state.is_finished() {
                snap.state = state;
            }
        });
    }

    pub(crate) fn push(&self, result: ActionResult) {
        self.tx.send_modify(|snap| {
            if !snap.state.is_finished() {
                snap.results.push(result);
            }
        });
    }
}
