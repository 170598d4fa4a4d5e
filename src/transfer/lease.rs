//! Lease Manager
//!
//! A lease is the `(owner_id, expires_at)` pair stored in the same record as
//! the entity. Acquisition is a single compare-and-swap against that pair:
//! it succeeds only when no lease exists or the existing one has expired.
//! Leases are never renewed; the TTL must exceed the slowest action.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::TransferError;
use super::types::{Lease, TransferProcessId};

/// Lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_ms: u64,
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl_ms: 60_000 }
    }
}

#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Claim `id` for `owner_id` until `now + ttl`
    ///
    /// Returns `false` when a live lease exists (including one held by the
    /// same owner) or the entity does not exist.
    async fn acquire(
        &self,
        id: TransferProcessId,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, TransferError>;

    /// Clear the lease only if `owner_id` still holds it
    ///
    /// Returns `false` when the lease was taken over by someone else.
    async fn release(&self, id: TransferProcessId, owner_id: &str) -> Result<bool, TransferError>;

    /// Current lease marker (expired or not)
    async fn current(&self, id: TransferProcessId) -> Result<Option<Lease>, TransferError>;
}
