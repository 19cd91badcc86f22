#![deny(missing_docs)]
//! Mediarelay runtime.
//!
//! Workers, the message reconciler and the session supervisor that ties them
//! to a chat connection.

/// Chat destination abstraction.
pub mod destination;
/// Worker construction per connection generation.
pub mod factory;
/// Feature pollers.
pub mod pollers;
/// Create-or-edit message reconciliation.
pub mod reconciler;
/// Output sinks for workers.
pub mod sinks;
/// Connection lifecycle.
pub mod supervisor;
/// Generic polling worker.
pub mod worker;

pub use destination::{Destination, DestinationError};
pub use factory::{GenerationContext, ServiceWorkerFactory, WorkerFactory, WorkerHandle};
pub use reconciler::{MessageReconciler, ReconcileOutcome};
pub use supervisor::{ConnectError, Connection, Connector, SessionSupervisor};
pub use worker::{Poller, PollingWorker, Sink, WorkerReport, WorkerSpec};
