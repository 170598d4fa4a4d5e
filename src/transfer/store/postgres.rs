//! PostgreSQL entity store
//!
//! One row per transfer process. Domain writes are CAS updates guarded by
//! `version`; lease writes are CAS updates guarded by the lease columns.
//! Timestamps are BIGINT Unix milliseconds supplied by the caller's clock so
//! every worker compares against the same time base it schedules with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row};

use super::TransferStore;
use crate::transfer::clock::{Clock, SystemClock};
use crate::transfer::error::TransferError;
use crate::transfer::lease::LeaseManager;
use crate::transfer::state::TransferProcessState;
use crate::transfer::types::{Lease, ProcessQuery, TransferProcess, TransferProcessId, TransferType};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS transfer_processes (
        id                   TEXT PRIMARY KEY,
        transfer_type        SMALLINT NOT NULL,
        state                INTEGER NOT NULL,
        version              BIGINT NOT NULL,
        retry_count          INTEGER NOT NULL DEFAULT 0,
        state_timestamp      BIGINT NOT NULL,
        due_at               BIGINT NOT NULL,
        correlation_id       TEXT NOT NULL,
        counterparty_address TEXT NOT NULL,
        protocol             TEXT NOT NULL,
        contract_id          TEXT NOT NULL,
        asset_id             TEXT NOT NULL,
        data_address         TEXT,
        destination          TEXT,
        error_detail         TEXT,
        transition_reason    TEXT,
        pending              BOOLEAN NOT NULL DEFAULT FALSE,
        pending_request      TEXT,
        inbox                TEXT NOT NULL DEFAULT '[]',
        previous_states      TEXT NOT NULL DEFAULT '[]',
        lease_owner          TEXT,
        lease_expires_at     BIGINT,
        created_at           BIGINT NOT NULL,
        updated_at           BIGINT NOT NULL,
        UNIQUE (correlation_id, transfer_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transfer_processes_state_due ON transfer_processes (state, due_at)",
    "CREATE INDEX IF NOT EXISTS idx_transfer_processes_lease ON transfer_processes (lease_owner)",
];

const SELECT_COLUMNS: &str = r#"
    SELECT id, transfer_type, state, version, retry_count, state_timestamp, due_at,
           correlation_id, counterparty_address, protocol, contract_id, asset_id,
           data_address, destination, error_detail, transition_reason, pending,
           pending_request, inbox, previous_states, lease_owner, lease_expires_at,
           created_at, updated_at
    FROM transfer_processes
"#;

/// PostgreSQL unique_violation
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgTransferStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table and indexes if missing
    pub async fn migrate(&self) -> Result<(), TransferError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("transfer_processes schema ready");
        Ok(())
    }

    fn row_to_process(row: &sqlx::postgres::PgRow) -> Result<TransferProcess, TransferError> {
        let id_str: String = row.try_get("id")?;
        let id: TransferProcessId = id_str
            .parse()
            .map_err(|_| TransferError::SystemError(format!("Invalid id format: {}", id_str)))?;

        let state_id: i32 = row.try_get("state")?;
        let state = TransferProcessState::from_id(state_id)
            .ok_or_else(|| TransferError::SystemError(format!("Invalid state ID: {}", state_id)))?;

        let type_id: i16 = row.try_get("transfer_type")?;
        let transfer_type = TransferType::from_id(type_id).ok_or_else(|| {
            TransferError::SystemError(format!("Invalid transfer_type: {}", type_id))
        })?;

        let retry_count: i32 = row.try_get("retry_count")?;
        let lease_owner: Option<String> = row.try_get("lease_owner")?;
        let lease_expires_at: Option<i64> = row.try_get("lease_expires_at")?;
        let lease = match (lease_owner, lease_expires_at) {
            (Some(owner_id), Some(expires_at)) => Some(Lease {
                owner_id,
                expires_at,
            }),
            _ => None,
        };

        Ok(TransferProcess {
            id,
            transfer_type,
            state,
            version: row.try_get("version")?,
            retry_count: retry_count.max(0) as u32,
            state_timestamp: row.try_get("state_timestamp")?,
            due_at: row.try_get("due_at")?,
            correlation_id: row.try_get("correlation_id")?,
            counterparty_address: row.try_get("counterparty_address")?,
            protocol: row.try_get("protocol")?,
            contract_id: row.try_get("contract_id")?,
            asset_id: row.try_get("asset_id")?,
            data_address: decode_opt(row.try_get("data_address")?)?,
            destination: decode_opt(row.try_get("destination")?)?,
            error_detail: row.try_get("error_detail")?,
            transition_reason: row.try_get("transition_reason")?,
            pending: row.try_get("pending")?,
            pending_request: decode_opt(row.try_get("pending_request")?)?,
            inbox: serde_json::from_str(&row.try_get::<String, _>("inbox")?)?,
            previous_states: serde_json::from_str(&row.try_get::<String, _>("previous_states")?)?,
            lease,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn rows_to_processes(
        rows: Vec<sqlx::postgres::PgRow>,
    ) -> Result<Vec<TransferProcess>, TransferError> {
        rows.iter().map(Self::row_to_process).collect()
    }
}

fn encode_opt<T: Serialize>(value: &Option<T>) -> Result<Option<String>, TransferError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

fn decode_opt<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, TransferError> {
    raw.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(Into::into)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn create(&self, process: &TransferProcess) -> Result<(), TransferError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfer_processes
                (id, transfer_type, state, version, retry_count, state_timestamp, due_at,
                 correlation_id, counterparty_address, protocol, contract_id, asset_id,
                 data_address, destination, error_detail, transition_reason, pending,
                 pending_request, inbox, previous_states, created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                 $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(process.id.to_string())
        .bind(process.transfer_type.id())
        .bind(process.state.id())
        .bind(process.version)
        .bind(process.retry_count as i32)
        .bind(process.state_timestamp)
        .bind(process.due_at)
        .bind(&process.correlation_id)
        .bind(&process.counterparty_address)
        .bind(&process.protocol)
        .bind(&process.contract_id)
        .bind(&process.asset_id)
        .bind(encode_opt(&process.data_address)?)
        .bind(encode_opt(&process.destination)?)
        .bind(&process.error_detail)
        .bind(&process.transition_reason)
        .bind(process.pending)
        .bind(encode_opt(&process.pending_request)?)
        .bind(serde_json::to_string(&process.inbox)?)
        .bind(serde_json::to_string(&process.previous_states)?)
        .bind(process.created_at)
        .bind(process.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(TransferError::DuplicateProcess(format!(
                "{} (correlation {})",
                process.id, process.correlation_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, id: TransferProcessId) -> Result<Option<TransferProcess>, TransferError> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_process).transpose()
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
        transfer_type: TransferType,
    ) -> Result<Option<TransferProcess>, TransferError> {
        let row = sqlx::query(&format!(
            "{} WHERE correlation_id = $1 AND transfer_type = $2",
            SELECT_COLUMNS
        ))
        .bind(correlation_id)
        .bind(transfer_type.id())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_process).transpose()
    }

    async fn update(&self, process: &TransferProcess) -> Result<TransferProcess, TransferError> {
        let row = sqlx::query(
            r#"
            UPDATE transfer_processes
            SET state = $3, version = version + 1, retry_count = $4, state_timestamp = $5,
                due_at = $6, data_address = $7, destination = $8, error_detail = $9,
                transition_reason = $10, pending = $11, pending_request = $12,
                inbox = $13, previous_states = $14, updated_at = $15
            WHERE id = $1 AND version = $2
            RETURNING version, lease_owner, lease_expires_at
            "#,
        )
        .bind(process.id.to_string())
        .bind(process.version)
        .bind(process.state.id())
        .bind(process.retry_count as i32)
        .bind(process.state_timestamp)
        .bind(process.due_at)
        .bind(encode_opt(&process.data_address)?)
        .bind(encode_opt(&process.destination)?)
        .bind(&process.error_detail)
        .bind(&process.transition_reason)
        .bind(process.pending)
        .bind(encode_opt(&process.pending_request)?)
        .bind(serde_json::to_string(&process.inbox)?)
        .bind(serde_json::to_string(&process.previous_states)?)
        .bind(process.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transfer_processes WHERE id = $1)")
                    .bind(process.id.to_string())
                    .fetch_one(&self.pool)
                    .await?;
            return Err(if exists {
                TransferError::VersionConflict {
                    id: process.id.to_string(),
                    expected: process.version,
                }
            } else {
                TransferError::NotFound(process.id.to_string())
            });
        };

        let mut stored = process.clone();
        stored.version = row.try_get("version")?;
        let owner: Option<String> = row.try_get("lease_owner")?;
        let expires_at: Option<i64> = row.try_get("lease_expires_at")?;
        stored.lease = owner.zip(expires_at).map(|(owner_id, expires_at)| Lease {
            owner_id,
            expires_at,
        });
        Ok(stored)
    }

    async fn find_due(&self, now: i64, limit: usize) -> Result<Vec<TransferProcess>, TransferError> {
        let resting: Vec<i32> = TransferProcessState::ALL
            .iter()
            .filter(|s| s.is_resting())
            .map(|s| s.id())
            .collect();

        let rows = sqlx::query(&format!(
            r#"{}
            WHERE (state <> ALL($1) OR (pending AND state <> $2))
              AND due_at <= $3
              AND (lease_owner IS NULL OR lease_expires_at <= $3)
            ORDER BY due_at ASC, id ASC
            LIMIT $4
            "#,
            SELECT_COLUMNS
        ))
        .bind(resting)
        .bind(TransferProcessState::Deprovisioned.id())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_processes(rows)
    }

    async fn list(&self, query: &ProcessQuery) -> Result<Vec<TransferProcess>, TransferError> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE ($1::INTEGER IS NULL OR state = $1)
              AND ($2::SMALLINT IS NULL OR transfer_type = $2)
            ORDER BY id ASC
            LIMIT $3 OFFSET $4
            "#,
            SELECT_COLUMNS
        ))
        .bind(query.state.map(|s| s.id()))
        .bind(query.transfer_type.map(|t| t.id()))
        .bind(query.effective_limit() as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_processes(rows)
    }
}

#[async_trait]
impl LeaseManager for PgTransferStore {
    async fn acquire(
        &self,
        id: TransferProcessId,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, TransferError> {
        let now = self.clock.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE transfer_processes
            SET lease_owner = $2, lease_expires_at = $3
            WHERE id = $1 AND (lease_owner IS NULL OR lease_expires_at <= $4)
            "#,
        )
        .bind(id.to_string())
        .bind(owner_id)
        .bind(now + ttl.as_millis() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, id: TransferProcessId, owner_id: &str) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_processes
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(id.to_string())
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn current(&self, id: TransferProcessId) -> Result<Option<Lease>, TransferError> {
        let row = sqlx::query(
            "SELECT lease_owner, lease_expires_at FROM transfer_processes WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner: Option<String> = row.try_get("lease_owner")?;
        let expires_at: Option<i64> = row.try_get("lease_expires_at")?;
        Ok(owner.zip(expires_at).map(|(owner_id, expires_at)| Lease {
            owner_id,
            expires_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::clock::ManualClock;
    use crate::transfer::types::TransferRequest;

    async fn connect(clock: Arc<ManualClock>) -> Option<PgTransferStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let store = PgTransferStore::with_clock(pool, clock);
        store.migrate().await.ok()?;
        Some(store)
    }

    fn process(now: i64) -> TransferProcess {
        TransferProcess::new_consumer(TransferRequest::new("http://provider", "c", "a"), now)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_create_update_conflict() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = connect(clock).await.expect("DATABASE_URL");
        let p = process(1_000);
        store.create(&p).await.unwrap();
        assert!(matches!(
            store.create(&p).await,
            Err(TransferError::DuplicateProcess(_))
        ));

        let mut next = p.clone();
        next.transition_to(TransferProcessState::Requesting, 1_100).unwrap();
        let stored = store.update(&next).await.unwrap();
        assert_eq!(stored.version, 2);

        let err = store.update(&next).await.unwrap_err();
        assert!(err.is_version_conflict());

        let loaded = store.find(p.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, TransferProcessState::Requesting);
        assert_eq!(loaded.previous_states, vec![TransferProcessState::Initial]);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_lease_expiry() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = connect(clock.clone()).await.expect("DATABASE_URL");
        let p = process(10_000);
        store.create(&p).await.unwrap();

        assert!(store.acquire(p.id, "w1", Duration::from_millis(100)).await.unwrap());
        assert!(!store.acquire(p.id, "w2", Duration::from_millis(100)).await.unwrap());
        let due = store.find_due(10_000, 1000).await.unwrap();
        assert!(due.iter().all(|d| d.id != p.id));

        clock.advance(Duration::from_millis(100));
        assert!(store.acquire(p.id, "w2", Duration::from_millis(100)).await.unwrap());
        assert!(!store.release(p.id, "w1").await.unwrap());
        assert!(store.release(p.id, "w2").await.unwrap());

        let loaded = store.find(p.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
    }
}
