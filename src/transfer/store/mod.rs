//! Entity Store
//!
//! Versioned persistence for transfer-process records. Every domain write is
//! a compare-and-set on `version`: the caller passes the snapshot it read and
//! the store rejects the write if anyone committed in between.
//!
//! Lease fields live in the same record but are written only through
//! [`LeaseManager`](super::lease::LeaseManager); `update` never touches them
//! and lease writes never bump `version`.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTransferStore;
pub use postgres::PgTransferStore;

use async_trait::async_trait;

use super::error::TransferError;
use super::types::{ProcessQuery, TransferProcess, TransferProcessId, TransferType};

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new record
    ///
    /// Fails with `DuplicateProcess` if the id or the
    /// `(correlation_id, transfer_type)` pair already exists.
    async fn create(&self, process: &TransferProcess) -> Result<(), TransferError>;

    async fn find(&self, id: TransferProcessId) -> Result<Option<TransferProcess>, TransferError>;

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
        transfer_type: TransferType,
    ) -> Result<Option<TransferProcess>, TransferError>;

    /// Compare-and-set write using `process.version` as the expected version
    ///
    /// Returns the stored record (version incremented by one). A stale
    /// version yields `VersionConflict` and leaves the record untouched.
    async fn update(&self, process: &TransferProcess) -> Result<TransferProcess, TransferError>;

    /// Dispatchable records with `due_at <= now` and no live lease, oldest first
    async fn find_due(&self, now: i64, limit: usize) -> Result<Vec<TransferProcess>, TransferError>;

    async fn list(&self, query: &ProcessQuery) -> Result<Vec<TransferProcess>, TransferError>;
}
