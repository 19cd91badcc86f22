//! Connection lifecycle and worker generations
//!
//! A generation is one connection plus the workers spawned when it becomes
//! ready. `start`, `reload` and `stop` always tear the previous generation down
//! completely before doing anything else: workers are cancelled and awaited,
//! then the connection is closed.
//!
//! Within a generation the driver reconnects on its own after a lost
//! connection or a failed attempt, waiting 5 s doubling to 300 s in between.
//! Only a rejected credential ends it for good.

use crate::destination::Destination;
use crate::factory::{GenerationContext, WorkerFactory, WorkerHandle};
use async_trait::async_trait;
use futures_util::future::join_all;
use mediarelay_core::config::{Settings, MISSING_TOKEN_ERROR};
use mediarelay_core::features::FeaturePlan;
use mediarelay_core::remote::Backoff;
use mediarelay_core::slots::SlotStore;
use mediarelay_core::status::{ProcessStatus, StatusReporter};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a connection attempt failed or a connection was lost
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The credential was rejected
    #[error("{0}")]
    Unauthorized(String),
    /// Network or protocol failure
    #[error("connection failed: {0}")]
    Transport(String),
}

impl ConnectError {
    /// Whether reconnecting with the same credential is pointless
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Underlying message without the variant prefix
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Unauthorized(reason) | Self::Transport(reason) => reason,
        }
    }
}

/// Opens connections to the chat service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and wait until the connection is ready
    async fn connect(&self, credential: &str) -> Result<Box<dyn Connection>, ConnectError>;
}

/// A ready connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Handle the workers publish through
    fn destination(&self) -> Arc<dyn Destination>;

    /// Resolves when the connection is lost.
    ///
    /// [`ConnectError::Unauthorized`] means the credential stopped working;
    /// anything else is worth reconnecting.
    async fn closed(&self) -> ConnectError;

    /// Release the connection
    async fn close(&self);
}

struct Generation {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl Generation {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.driver.await {
            if e.is_panic() {
                error!(error = %e, "Connection driver panicked");
            }
        }
    }
}

/// Owns the connection and the workers built on top of it
pub struct SessionSupervisor {
    connector: Arc<dyn Connector>,
    factory: Arc<dyn WorkerFactory>,
    status: StatusReporter,
    generation: Mutex<Option<Generation>>,
}

impl SessionSupervisor {
    /// Create an idle supervisor reporting into `status`
    pub fn new(
        connector: Arc<dyn Connector>,
        factory: Arc<dyn WorkerFactory>,
        status: StatusReporter,
    ) -> Self {
        Self {
            connector,
            factory,
            status,
            generation: Mutex::new(None),
        }
    }

    /// Status written by this supervisor
    #[must_use]
    pub const fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Tear down any running generation and start a new one from `settings`.
    ///
    /// Returns once the connection attempt has been initiated; readiness is
    /// reported through the status.
    pub async fn start(&self, settings: Settings) {
        let mut generation = self.generation.lock().await;
        if let Some(previous) = generation.take() {
            debug!("Stopping previous generation");
            previous.shutdown().await;
            self.status.set(ProcessStatus::Stopped, None);
        }

        let plan = FeaturePlan::from_settings(&settings);
        let Some(credential) = settings.bot_token().map(str::to_string) else {
            warn!("{MISSING_TOKEN_ERROR}; not connecting");
            self.status
                .set(ProcessStatus::Stopped, Some(MISSING_TOKEN_ERROR.to_string()));
            return;
        };

        info!(
            enabled = ?plan.enabled,
            disabled = plan.disabled.len(),
            "Starting connection"
        );
        let slots = Arc::new(SlotStore::load(settings.general.message_id_file.clone()));
        let cancel = CancellationToken::new();
        let driver = Driver {
            connector: self.connector.clone(),
            factory: self.factory.clone(),
            status: self.status.clone(),
            settings: Arc::new(settings),
            plan,
            slots,
            cancel: cancel.clone(),
        };
        *generation = Some(Generation {
            cancel,
            driver: tokio::spawn(driver.run(credential)),
        });
    }

    /// Same as [`start`](Self::start); the worker set is always rebuilt
    pub async fn reload(&self, settings: Settings) {
        info!("Reloading");
        self.start(settings).await;
    }

    /// Cancel workers, close the connection and wait for both
    pub async fn stop(&self) {
        let previous = self.generation.lock().await.take();
        if let Some(previous) = previous {
            previous.shutdown().await;
            info!("Stopped");
        }
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    factory: Arc<dyn WorkerFactory>,
    status: StatusReporter,
    settings: Arc<Settings>,
    plan: FeaturePlan,
    slots: Arc<SlotStore>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(self, credential: String) {
        let mut backoff = Backoff::default();
        loop {
            let failure = match self.connect(&credential).await {
                None => return,
                Some(Ok(connection)) => {
                    backoff.reset();
                    match self.serve(connection).await {
                        Some(lost) => lost,
                        None => return,
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Connection failed");
                    self.status.set(ProcessStatus::Error, Some(e.to_string()));
                    e
                }
            };

            if failure.is_fatal() {
                return;
            }

            let delay = backoff.next_delay();
            info!(retry_in_secs = delay.as_secs(), "Reconnecting");
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// `None` when cancelled while connecting
    async fn connect(&self, credential: &str) -> Option<Result<Box<dyn Connection>, ConnectError>> {
        tokio::select! {
            () = self.cancel.cancelled() => {
                self.status.set_status(ProcessStatus::Stopped);
                None
            }
            result = self.connector.connect(credential) => Some(result),
        }
    }

    /// Run one worker set on `connection` until cancelled (`None`) or the
    /// connection is lost
    async fn serve(&self, connection: Box<dyn Connection>) -> Option<ConnectError> {
        info!("Connection ready");
        self.status.set(ProcessStatus::Running, None);

        let ctx = GenerationContext {
            settings: self.settings.clone(),
            plan: self.plan.clone(),
            destination: connection.destination(),
            slots: self.slots.clone(),
        };
        let workers_cancel = self.cancel.child_token();
        let workers = self.factory.spawn(&ctx, &workers_cancel);

        let lost = tokio::select! {
            () = self.cancel.cancelled() => None,
            lost = connection.closed() => Some(lost),
        };

        workers_cancel.cancel();
        join_workers(workers).await;
        connection.close().await;

        match &lost {
            None => {
                info!("Connection closed");
                self.status.set_status(ProcessStatus::Stopped);
            }
            Some(e) => {
                error!(reason = %e.reason(), fatal = e.is_fatal(), "Connection lost");
                self.status
                    .set(ProcessStatus::Error, Some(e.reason().to_string()));
            }
        }
        lost
    }
}

async fn join_workers(workers: Vec<WorkerHandle>) {
    let (slots, handles): (Vec<_>, Vec<_>) =
        workers.into_iter().map(|w| (w.slot, w.handle)).unzip();

    for (slot, result) in slots.iter().zip(join_all(handles).await) {
        match result {
            Ok(report) => debug!(
                slot = %slot,
                cycles = report.cycles,
                failures = report.failures,
                "Worker joined"
            ),
            Err(e) if e.is_panic() => error!(slot = %slot, error = %e, "Worker task panicked"),
            Err(_) => {}
        }
    }
}
