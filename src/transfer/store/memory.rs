//! In-memory entity store
//!
//! `DashMap::get_mut` holds the shard write lock for the entry, which makes
//! the version check + write and the lease check + claim atomic per record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::TransferStore;
use crate::transfer::clock::{Clock, SystemClock};
use crate::transfer::error::TransferError;
use crate::transfer::lease::LeaseManager;
use crate::transfer::types::{Lease, ProcessQuery, TransferProcess, TransferProcessId, TransferType};

pub struct InMemoryTransferStore {
    records: DashMap<TransferProcessId, TransferProcess>,
    by_correlation: DashMap<(String, TransferType), TransferProcessId>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Lease expiry is evaluated against `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            by_correlation: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryTransferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn create(&self, process: &TransferProcess) -> Result<(), TransferError> {
        let key = (process.correlation_id.clone(), process.transfer_type);
        match self.by_correlation.entry(key) {
            Entry::Occupied(_) => Err(TransferError::DuplicateProcess(format!(
                "correlation {} ({})",
                process.correlation_id, process.transfer_type
            ))),
            Entry::Vacant(slot) => match self.records.entry(process.id) {
                Entry::Occupied(_) => Err(TransferError::DuplicateProcess(process.id.to_string())),
                Entry::Vacant(record) => {
                    record.insert(process.clone());
                    slot.insert(process.id);
                    Ok(())
                }
            },
        }
    }

    async fn find(&self, id: TransferProcessId) -> Result<Option<TransferProcess>, TransferError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
        transfer_type: TransferType,
    ) -> Result<Option<TransferProcess>, TransferError> {
        let id = self
            .by_correlation
            .get(&(correlation_id.to_string(), transfer_type))
            .map(|e| *e.value());
        match id {
            Some(id) => self.find(id).await,
            None => Ok(None),
        }
    }

    async fn update(&self, process: &TransferProcess) -> Result<TransferProcess, TransferError> {
        let mut stored = self
            .records
            .get_mut(&process.id)
            .ok_or_else(|| TransferError::NotFound(process.id.to_string()))?;

        if stored.version != process.version {
            return Err(TransferError::VersionConflict {
                id: process.id.to_string(),
                expected: process.version,
            });
        }

        let lease = stored.lease.take();
        let mut next = process.clone();
        next.version = process.version + 1;
        next.lease = lease;
        *stored = next.clone();
        Ok(next)
    }

    async fn find_due(&self, now: i64, limit: usize) -> Result<Vec<TransferProcess>, TransferError> {
        let mut due: Vec<TransferProcess> = self
            .records
            .iter()
            .filter(|r| r.is_dispatchable() && r.is_due(now) && !r.is_leased(now))
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|p| (p.due_at, p.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn list(&self, query: &ProcessQuery) -> Result<Vec<TransferProcess>, TransferError> {
        let mut matched: Vec<TransferProcess> = self
            .records
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matched.sort_by_key(|p| p.id);
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect())
    }
}

#[async_trait]
impl LeaseManager for InMemoryTransferStore {
    async fn acquire(
        &self,
        id: TransferProcessId,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, TransferError> {
        let now = self.clock.now_millis();
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.is_leased(now) {
            return Ok(false);
        }
        record.lease = Some(Lease {
            owner_id: owner_id.to_string(),
            expires_at: now + ttl.as_millis() as i64,
        });
        Ok(true)
    }

    async fn release(&self, id: TransferProcessId, owner_id: &str) -> Result<bool, TransferError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        match &record.lease {
            Some(lease) if lease.owner_id == owner_id => {
                record.lease = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current(&self, id: TransferProcessId) -> Result<Option<Lease>, TransferError> {
        Ok(self.records.get(&id).and_then(|r| r.lease.clone()))
    }
}
