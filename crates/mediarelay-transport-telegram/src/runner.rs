//! Telegram connection lifecycle
//!
//! The Bot API is stateless HTTP, so "connected" means the token was accepted
//! by `getMe`. Liveness is then checked periodically with the same call: an
//! invalid token ends the connection for good, repeated network failures end it
//! after [`HEARTBEAT_MAX_FAILURES`] attempts in a row and the supervisor
//! reconnects.

use crate::bot::destination::TelegramDestination;
use crate::bot::resilient::is_invalid_token;
use async_trait::async_trait;
use mediarelay_core::config::{
    get_heartbeat_interval_secs, get_http_timeout_secs, HEARTBEAT_MAX_FAILURES,
};
use mediarelay_runtime::{ConnectError, Connection, Connector, Destination};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Reported when Telegram rejects the bot token
pub const INVALID_TOKEN_ERROR: &str = "Improper token has been passed.";

/// Outcome of a failed liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The connection cannot recover
    Fatal(String),
    /// Worth probing again
    Transient(String),
}

impl From<ProbeFailure> for ConnectError {
    fn from(failure: ProbeFailure) -> Self {
        match failure {
            ProbeFailure::Fatal(reason) => Self::Unauthorized(reason),
            ProbeFailure::Transient(reason) => Self::Transport(reason),
        }
    }
}

/// Probe every `interval` until a fatal failure or `max_failures` transient
/// failures in a row; returns why the connection is considered lost.
pub async fn heartbeat<F, Fut>(mut probe: F, interval: Duration, max_failures: u32) -> ProbeFailure
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ProbeFailure>>,
{
    let mut failures = 0;
    loop {
        tokio::time::sleep(interval).await;
        match probe().await {
            Ok(()) => {
                if failures > 0 {
                    info!(failures, "Telegram reachable again");
                }
                failures = 0;
            }
            Err(fatal @ ProbeFailure::Fatal(_)) => return fatal,
            Err(ProbeFailure::Transient(reason)) => {
                failures += 1;
                warn!(failures, max_failures, error = %reason, "Telegram heartbeat failed");
                if failures >= max_failures {
                    return ProbeFailure::Transient(format!(
                        "Connection to Telegram lost: {reason}"
                    ));
                }
            }
        }
    }
}

async fn probe(bot: &Bot) -> Result<(), ProbeFailure> {
    match bot.get_me().await {
        Ok(_) => Ok(()),
        Err(e) if is_invalid_token(&e) => {
            Err(ProbeFailure::Fatal(INVALID_TOKEN_ERROR.to_string()))
        }
        Err(e) => Err(ProbeFailure::Transient(e.to_string())),
    }
}

/// Opens Bot API sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct TelegramConnector;

impl TelegramConnector {
    /// Connector with default HTTP settings
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    async fn connect(&self, credential: &str) -> Result<Box<dyn Connection>, ConnectError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(get_http_timeout_secs()))
            .build()
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        let bot = Bot::with_client(credential, client);

        match bot.get_me().await {
            Ok(me) => info!(username = %me.username(), "Connected to Telegram"),
            Err(e) if is_invalid_token(&e) => {
                return Err(ConnectError::Unauthorized(INVALID_TOKEN_ERROR.to_string()));
            }
            Err(e) => return Err(ConnectError::Transport(e.to_string())),
        }

        Ok(Box::new(TelegramConnection::spawn(
            bot,
            Duration::from_secs(get_heartbeat_interval_secs()),
        )))
    }
}

/// A verified bot session plus its heartbeat task
pub struct TelegramConnection {
    destination: Arc<TelegramDestination>,
    lost: watch::Receiver<Option<ProbeFailure>>,
    heartbeat: JoinHandle<()>,
}

impl TelegramConnection {
    /// Start the heartbeat for an already verified `bot`
    #[must_use]
    pub fn spawn(bot: Bot, interval: Duration) -> Self {
        let (tx, lost) = watch::channel(None);
        let probe_bot = bot.clone();
        let task = tokio::spawn(async move {
            let failure = heartbeat(
                || {
                    let bot = probe_bot.clone();
                    async move { probe(&bot).await }
                },
                interval,
                HEARTBEAT_MAX_FAILURES,
            )
            .await;
            tx.send_replace(Some(failure));
        });

        Self {
            destination: Arc::new(TelegramDestination::new(bot)),
            lost,
            heartbeat: task,
        }
    }
}

#[async_trait]
impl Connection for TelegramConnection {
    fn destination(&self) -> Arc<dyn Destination> {
        self.destination.clone()
    }

    async fn closed(&self) -> ConnectError {
        let mut lost = self.lost.clone();
        let failure = match lost.wait_for(Option::is_some).await {
            Ok(failure) => (*failure).clone(),
            Err(_) => None,
        };
        failure.map_or_else(
            || ConnectError::Transport("Telegram heartbeat stopped".to_string()),
            ConnectError::from,
        )
    }

    async fn close(&self) {
        self.heartbeat.abort();
        info!("Telegram connection closed");
    }
}

impl Drop for TelegramConnection {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}
