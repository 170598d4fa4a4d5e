//! Transfer Error Types
//!
//! One error type for the whole transfer-process module. Action-level
//! failures never surface here: they are folded into the entity's
//! `state` / `error_detail` by the dispatcher.

use thiserror::Error;

use super::state::TransferProcessState;
use super::types::MessageKind;

/// Transfer error types
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid transfer process id: {0}")]
    InvalidId(String),

    /// Command not valid in the entity's current state
    #[error("Cannot {action} transfer process {id} in state {state}")]
    InvalidState {
        id: String,
        state: TransferProcessState,
        action: &'static str,
    },

    /// Transition not present in the transition table
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: TransferProcessState,
        to: TransferProcessState,
    },

    // === Concurrency Errors ===
    /// Optimistic-concurrency write against a stale version
    #[error("Version conflict on {id}: expected version {expected}")]
    VersionConflict { id: String, expected: i64 },

    #[error("Transfer process already exists: {0}")]
    DuplicateProcess(String),

    /// A different control request is still waiting to be observed
    #[error("Transfer process {id} already has a pending {pending} request")]
    RequestPending { id: String, pending: &'static str },

    /// Inbound protocol message not meaningful in the current state
    #[error("Unexpected {kind} message for transfer process {id} in state {state}")]
    UnexpectedMessage {
        id: String,
        state: TransferProcessState,
        kind: MessageKind,
    },

    // === Lookup Errors ===
    #[error("Transfer process not found: {0}")]
    NotFound(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::InvalidId(_) => "INVALID_ID",
            TransferError::InvalidState { .. } => "INVALID_STATE",
            TransferError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            TransferError::VersionConflict { .. } => "VERSION_CONFLICT",
            TransferError::DuplicateProcess(_) => "DUPLICATE_PROCESS",
            TransferError::RequestPending { .. } => "REQUEST_PENDING",
            TransferError::UnexpectedMessage { .. } => "UNEXPECTED_MESSAGE",
            TransferError::NotFound(_) => "TRANSFER_PROCESS_NOT_FOUND",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
            TransferError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidRequest(_) | TransferError::InvalidId(_) => 400,
            TransferError::NotFound(_) => 404,
            TransferError::InvalidState { .. }
            | TransferError::VersionConflict { .. }
            | TransferError::DuplicateProcess(_)
            | TransferError::RequestPending { .. }
            | TransferError::UnexpectedMessage { .. } => 409,
            TransferError::DatabaseError(_)
            | TransferError::InvalidStateTransition { .. }
            | TransferError::SystemError(_) => 500,
        }
    }

    #[inline]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, TransferError::VersionConflict { .. })
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::SystemError(format!("serialization: {}", e))
    }
}
