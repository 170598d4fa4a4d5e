//! Transfer Coordinator - transfer-process lifecycle for data-exchange connectors
//!
//! Drives each transfer process through a persistent state machine. Any
//! number of dispatchers, in one process or across nodes, share a store and
//! coordinate through per-entity leases and versioned writes.
//!
//! # Modules
//!
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL connection pool
//! - [`transfer`] - state machine, store, dispatcher, gateways and HTTP API

pub mod config;
pub mod db;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use transfer::{
    Dispatcher, TransferCoordinator, TransferError, TransferProcess, TransferProcessId,
    TransferProcessState,
};
