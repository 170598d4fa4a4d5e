//! Transfer API Layer
//!
//! HTTP handlers for the control plane (create / query / commands) and the
//! inbound protocol endpoints. Handlers only validate, call the
//! coordinator and map errors; all lifecycle work happens in the dispatcher.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::coordinator::TransferCoordinator;
use super::error::TransferError;
use super::state::TransferProcessState;
use super::types::{
    DataAddress, InboundRequest, ProcessQuery, ProtocolEvent, TransferProcess, TransferProcessId,
    TransferRequest, TransferType,
};

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Optional body for terminate / suspend
#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// External view of a transfer process
#[derive(Debug, Serialize)]
pub struct TransferProcessResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    pub state: TransferProcessState,
    pub state_code: i32,
    pub state_timestamp: i64,
    pub version: i64,
    pub correlation_id: String,
    pub counterparty_address: String,
    pub protocol: String,
    pub contract_id: String,
    pub asset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<DataAddress>,
    /// Always present, null when the process is healthy
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_reason: Option<String>,
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<&'static str>,
    pub retry_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&TransferProcess> for TransferProcessResponse {
    fn from(p: &TransferProcess) -> Self {
        Self {
            id: p.id.to_string(),
            transfer_type: p.transfer_type,
            state: p.state,
            state_code: p.state.id(),
            state_timestamp: p.state_timestamp,
            version: p.version,
            correlation_id: p.correlation_id.clone(),
            counterparty_address: p.counterparty_address.clone(),
            protocol: p.protocol.clone(),
            contract_id: p.contract_id.clone(),
            asset_id: p.asset_id.clone(),
            data_address: p.data_address.clone(),
            destination: p.destination.clone(),
            error_detail: p.error_detail.clone(),
            transition_reason: p.transition_reason.clone(),
            pending: p.pending,
            pending_request: p.pending_request.as_ref().map(|r| r.name()),
            retry_count: p.retry_count,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Result of an inbound protocol message
#[derive(Debug, Serialize)]
pub struct MessageAck {
    /// false when the message was a redelivery with no new effect
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
}

/// API wrapper for standard response format
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INVALID_ID: i32 = 1002;
    pub const NOT_FOUND: i32 = 4001;
    pub const INVALID_STATE: i32 = 4091;
    pub const REQUEST_PENDING: i32 = 4092;
    pub const UNEXPECTED_MESSAGE: i32 = 4093;
    pub const CONFLICT: i32 = 4099;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map TransferError to (StatusCode, error_code, message)
fn map_error(e: &TransferError) -> (StatusCode, i32, String) {
    let status = match e.http_status() {
        400 => StatusCode::BAD_REQUEST,
        404 => StatusCode::NOT_FOUND,
        409 => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let code = match e.code() {
        "INVALID_REQUEST" => error_codes::INVALID_PARAMETER,
        "INVALID_ID" => error_codes::INVALID_ID,
        "TRANSFER_PROCESS_NOT_FOUND" => error_codes::NOT_FOUND,
        "INVALID_STATE" => error_codes::INVALID_STATE,
        "REQUEST_PENDING" => error_codes::REQUEST_PENDING,
        "UNEXPECTED_MESSAGE" => error_codes::UNEXPECTED_MESSAGE,
        "VERSION_CONFLICT" | "DUPLICATE_PROCESS" => error_codes::CONFLICT,
        _ => error_codes::INTERNAL_ERROR,
    };

    (status, code, e.to_string())
}

fn api_error(e: TransferError) -> ApiError {
    let (status, code, msg) = map_error(&e);
    if status.is_server_error() {
        tracing::error!(code = e.code(), "[API] {}", msg);
    } else {
        tracing::debug!(code = e.code(), "[API] {}", msg);
    }
    (status, Json(ApiResponse::<()>::error(code, msg)))
}

fn parse_id(raw: &str) -> Result<TransferProcessId, ApiError> {
    raw.parse().map_err(api_error)
}

fn ok<T>(status: StatusCode, data: T) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::success(data))))
}

fn view(p: TransferProcess) -> TransferProcessResponse {
    TransferProcessResponse::from(&p)
}

// ============================================================================
// Router
// ============================================================================

/// Build the HTTP router: control plane under `/v1/transferprocesses`,
/// protocol endpoints under `/v1/protocol/transfers`.
pub fn router(coordinator: Arc<TransferCoordinator>) -> Router {
    Router::new()
        .route("/v1/health", get(health_check))
        .route(
            "/v1/transferprocesses",
            post(create_transfer_process).get(list_transfer_processes),
        )
        .route("/v1/transferprocesses/{id}", get(get_transfer_process))
        .route("/v1/transferprocesses/{id}/{command}", post(run_command))
        .route("/v1/protocol/transfers/request", post(receive_request))
        .route("/v1/protocol/transfers/{message}", post(receive_message))
        .with_state(coordinator)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /v1/health
///
/// Probes the store with a one-row list.
pub async fn health_check(
    State(coordinator): State<Arc<TransferCoordinator>>,
) -> ApiResult<HealthResponse> {
    let probe = ProcessQuery {
        limit: Some(1),
        ..Default::default()
    };
    match coordinator.list(&probe).await {
        Ok(_) => ok(
            StatusCode::OK,
            HealthResponse {
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            },
        ),
        Err(e) => {
            tracing::error!("[HEALTH] store probe failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<()>::error(
                    error_codes::SERVICE_UNAVAILABLE,
                    "unavailable",
                )),
            ))
        }
    }
}

/// POST /v1/transferprocesses
pub async fn create_transfer_process(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<TransferProcessResponse> {
    let created = coordinator.create(req).await.map_err(api_error)?;
    ok(StatusCode::CREATED, view(created))
}

/// GET /v1/transferprocesses?state=STARTED&transfer_type=CONSUMER&offset=0&limit=50
pub async fn list_transfer_processes(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Query(query): Query<ProcessQuery>,
) -> ApiResult<Vec<TransferProcessResponse>> {
    let processes = coordinator.list(&query).await.map_err(api_error)?;
    ok(
        StatusCode::OK,
        processes.iter().map(TransferProcessResponse::from).collect(),
    )
}

/// GET /v1/transferprocesses/{id}
pub async fn get_transfer_process(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Path(id): Path<String>,
) -> ApiResult<TransferProcessResponse> {
    let id = parse_id(&id)?;
    let process = coordinator.get(id).await.map_err(api_error)?;
    ok(StatusCode::OK, view(process))
}

/// POST /v1/transferprocesses/{id}/{terminate|suspend|resume|complete|deprovision}
///
/// Commands are recorded and acted on asynchronously, so success is 202.
pub async fn run_command(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Path((id, command)): Path<(String, String)>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<TransferProcessResponse> {
    let id = parse_id(&id)?;
    let reason = body.and_then(|Json(b)| b.reason);

    let result = match command.as_str() {
        "terminate" => coordinator.terminate(id, reason).await,
        "suspend" => coordinator.suspend(id, reason).await,
        "resume" => coordinator.resume(id).await,
        "complete" => coordinator.complete(id).await,
        "deprovision" => coordinator.deprovision(id).await,
        other => Err(TransferError::InvalidRequest(format!(
            "unknown command: {}",
            other
        ))),
    };

    let process = result.map_err(api_error)?;
    tracing::info!(process_id = %id, command = %command, "[API] command recorded");
    ok(StatusCode::ACCEPTED, view(process))
}

/// POST /v1/protocol/transfers/request
pub async fn receive_request(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Json(req): Json<InboundRequest>,
) -> ApiResult<TransferProcessResponse> {
    let process = coordinator.handle_request(req).await.map_err(api_error)?;
    ok(StatusCode::OK, view(process))
}

/// POST /v1/protocol/transfers/{acknowledgement|start|suspension|completion|termination}
pub async fn receive_message(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Path(message): Path<String>,
    Json(event): Json<ProtocolEvent>,
) -> ApiResult<MessageAck> {
    if event.kind.path_segment() != message {
        return Err(api_error(TransferError::InvalidRequest(format!(
            "{} message posted to /{}",
            event.kind, message
        ))));
    }
    let accepted = coordinator.handle_message(event).await.map_err(api_error)?;
    ok(StatusCode::OK, MessageAck { accepted })
}

// ============================================================================
// Unit Tests
// ============================================================================
