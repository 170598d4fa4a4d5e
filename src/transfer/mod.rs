//! Transfer Process Lifecycle
//!
//! Coordinates the lifecycle of data-transfer processes between a consumer
//! and a provider connector. Every process is a persistent state machine;
//! a pool of dispatchers drives it forward, one lease holder at a time.
//!
//! # Architecture
//!
//! ```text
//! control API ─┐                        ┌─▶ ProtocolGateway (counterparty)
//!              ├─▶ TransferStore ◀─ Dispatcher ─▶ StateMachine
//! protocol API ┘   (versioned)     (lease) └─▶ DataPlane
//!                                      │
//!                                      └─▶ EventPublisher
//! ```
//!
//! # State Machine
//!
//! ```text
//! INITIAL → REQUESTING → REQUESTED → STARTING → STARTED → COMPLETING → COMPLETED
//!                                                  ↕
//!                                    SUSPENDING → SUSPENDED → RESUMING
//!
//! any non-terminal ──▶ TERMINATING → TERMINATED → DEPROVISIONING → DEPROVISIONED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Versioned writes**: every write is a compare-and-swap on `version`
//! 2. **Single holder**: only the lease holder runs a state's action
//! 3. **Persist-after-act**: the outcome of an action is committed before
//!    the next action starts; a lost race discards the outcome
//! 4. **Termination wins**: a pending terminate pre-empts every other action

pub mod api;
pub mod clock;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lease;
pub mod machine;
pub mod retry;
pub mod state;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "mock-api"))]
pub mod mock;


// Re-exports for convenience
pub use api::{ApiResponse, TransferProcessResponse, router};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::TransferCoordinator;
pub use dispatcher::{DispatchResult, DispatchStats, Dispatcher, DispatcherConfig};
pub use error::TransferError;
pub use events::{BroadcastPublisher, EventPublisher, EventsConfig, TransferEvent};
pub use gateway::{DataPlane, OpResult, ProtocolConfig, ProtocolGateway, ProtocolMessage};
pub use lease::{LeaseConfig, LeaseManager};
pub use machine::{Outcome, StateMachine};
pub use retry::{RetryConfig, RetryScheduler};
pub use state::TransferProcessState;
pub use store::{InMemoryTransferStore, PgTransferStore, TransferStore};
pub use types::{
    DataAddress, InboundRequest, MessageKind, PendingRequest, ProcessQuery, ProtocolEvent,
    TransferProcess, TransferProcessId, TransferRequest, TransferType,
};
