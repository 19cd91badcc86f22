//! Process status shared with the admin surface
//!
//! The supervisor is the only writer. Readers either take a snapshot or
//! subscribe to transitions.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Coarse connection status shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// No connection, either never started or cleanly stopped
    #[default]
    Stopped,
    /// Connection is ready and workers are running
    Running,
    /// Connection ended with a failure
    Error,
}

impl ProcessStatus {
    /// Lowercase label, e.g. for a status badge
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus the last recorded error
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatusSnapshot {
    /// Current status
    pub status: ProcessStatus,
    /// Most recent failure reason, if any
    pub last_error: Option<String>,
}

/// Observable status holder
#[derive(Clone)]
pub struct StatusReporter {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    /// Create a reporter in the `stopped` state with no error
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current status and last error
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    /// Current status only
    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        self.tx.borrow().status
    }

    /// Last recorded error
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.tx.borrow().last_error.clone()
    }

    /// Receive every subsequent transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Replace both status and last error
    pub fn set(&self, status: ProcessStatus, last_error: Option<String>) {
        self.tx.send_replace(StatusSnapshot { status, last_error });
    }

    /// Change the status, keep the last error
    pub fn set_status(&self, status: ProcessStatus) {
        self.tx.send_modify(|s| s.status = status);
    }
}
