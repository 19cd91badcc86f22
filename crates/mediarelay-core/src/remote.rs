//! Resilient wrapper around a flaky external service
//!
//! [`ResilientClient`] remembers whether the last call succeeded. After a
//! failure it refuses to touch the network until the backoff has elapsed and
//! reports a human readable degraded status in the meantime.

use crate::config::{REMOTE_BACKOFF_INITIAL_SECS, REMOTE_BACKOFF_MAX_SECS};
use crate::sources::RemoteError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Doubling delay with an upper bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(REMOTE_BACKOFF_INITIAL_SECS),
            Duration::from_secs(REMOTE_BACKOFF_MAX_SECS),
        )
    }
}

impl Backoff {
    /// Create a backoff starting at `initial`, never exceeding `max`
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to apply now; the next call returns twice as much, up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Delay the next failure will use
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// A service that needs a session before it can be queried
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Data returned by a successful query
    type Output: Send;

    /// Name used in logs and status text
    fn name(&self) -> &str;

    /// Establish a session
    async fn login(&self) -> Result<(), RemoteError>;

    /// Run the query; assumes a session exists
    async fn query(&self) -> Result<Self::Output, RemoteError>;
}

/// Result of [`ResilientClient::fetch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFetch<T> {
    /// The query succeeded
    Fetched(T),
    /// The service is degraded; see [`ResilientClient::status_text`]
    Unavailable,
}

/// Connect/retry state around one [`RemoteService`]
pub struct ResilientClient<S> {
    service: S,
    connected: bool,
    backoff: Backoff,
    next_try_at: Option<Instant>,
    last_error: Option<String>,
}

impl<S: RemoteService> ResilientClient<S> {
    /// Wrap `service` with the default 5 s -> 300 s backoff
    pub fn new(service: S) -> Self {
        Self::with_backoff(service, Backoff::default())
    }

    /// Wrap `service` with a custom backoff
    pub const fn with_backoff(service: S, backoff: Backoff) -> Self {
        Self {
            service,
            connected: false,
            backoff,
            next_try_at: None,
            last_error: None,
        }
    }

    /// Log in if needed, then query.
    ///
    /// While backing off this returns [`RemoteFetch::Unavailable`] without any
    /// network call.
    pub async fn fetch(&mut self) -> RemoteFetch<S::Output> {
        if !self.connected {
            if let Some(at) = self.next_try_at {
                if Instant::now() < at {
                    return RemoteFetch::Unavailable;
                }
            }
            if let Err(e) = self.service.login().await {
                self.on_failure(&e);
                return RemoteFetch::Unavailable;
            }
        }

        match self.service.query().await {
            Ok(data) => {
                self.on_success();
                RemoteFetch::Fetched(data)
            }
            Err(e) => {
                self.on_failure(&e);
                RemoteFetch::Unavailable
            }
        }
    }

    /// Degraded status, `None` while connected.
    ///
    /// Eg. `qBittorrent unreachable: connection refused. Retrying in 20s.`
    #[must_use]
    pub fn status_text(&self) -> Option<String> {
        if self.connected {
            return None;
        }
        let remaining = self
            .next_try_at
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(Instant::now()));
        let secs = (remaining.as_millis() + 500) / 1000;
        let reason = self.last_error.as_deref().unwrap_or("connection failed");
        Some(format!(
            "{} unreachable: {reason}. Retrying in {secs}s.",
            self.service.name()
        ))
    }

    /// Whether the last call succeeded
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Message of the last failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current backoff state
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Wrapped service
    #[must_use]
    pub const fn service(&self) -> &S {
        &self.service
    }

    fn on_success(&mut self) {
        if !self.connected {
            info!(service = self.service.name(), "Remote service reachable");
        }
        self.connected = true;
        self.last_error = None;
        self.next_try_at = None;
        self.backoff.reset();
    }

    fn on_failure(&mut self, error: &RemoteError) {
        let delay = self.backoff.next_delay();
        warn!(
            service = self.service.name(),
            error = %error,
            retry_in_secs = delay.as_secs(),
            "Remote service call failed"
        );
        self.connected = false;
        self.last_error = Some(error.to_string());
        self.next_try_at = Some(Instant::now() + delay);
    }
}
