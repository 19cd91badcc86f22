#![deny(missing_docs)]
//! Mediarelay core library.
//!
//! Settings, the feature table, service clients, renderers and the shared
//! state (status, slot identities) used by the runtime.

/// Configuration management.
pub mod config;
/// Feature table and dependency checks.
pub mod features;
/// Backoff and the resilient remote client.
pub mod remote;
/// Summary renderers.
pub mod render;
/// Slot identity persistence.
pub mod slots;
/// External service clients.
pub mod sources;
/// Observable process status.
pub mod status;
/// Utility functions.
pub mod utils;
