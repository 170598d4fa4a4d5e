//! Protocol Gateway and Data Plane
//!
//! Outbound boundaries used by entry actions. Both are idempotent from the
//! caller's side: the same message (same correlation id and kind) or the same
//! flow operation (same process id) may be delivered more than once.
//!
//! Results are three-way, like the adapter results they replace:
//! - `Success`: delivered and accepted
//! - `Failed`: explicitly rejected by the peer, retrying will not help
//! - `Transient`: unknown outcome (timeout, network, 5xx), must retry

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{
    DataAddress, InboundRequest, MessageKind, ProtocolEvent, TransferProcess, TransferProcessId,
    TransferType,
};

/// Result of an outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Success,
    /// Explicit rejection
    Failed(String),
    /// Outcome unknown
    Transient(String),
}

impl OpResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, OpResult::Success)
    }

    #[inline]
    pub fn is_explicit_fail(&self) -> bool {
        matches!(self, OpResult::Failed(_))
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, OpResult::Transient(_))
    }
}

/// Outbound protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Per-call timeout for protocol and data-plane requests
    pub timeout_ms: u64,
    /// Our own protocol base URL, sent to providers with a transfer request
    pub callback_address: String,
    /// Data-plane base URL. No data plane is called when absent.
    pub data_plane_url: Option<String>,
}

impl ProtocolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            callback_address: "http://127.0.0.1:8080/v1/protocol".to_string(),
            data_plane_url: None,
        }
    }
}

/// Message handed to the gateway by an entry action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    /// Sending process
    pub process_id: TransferProcessId,
    pub sender: TransferType,
    pub correlation_id: String,
    /// Base URL of the receiving connector
    pub counterparty_address: String,
    pub protocol: String,
    pub contract_id: String,
    pub asset_id: String,
    pub data_address: Option<DataAddress>,
    pub destination: Option<DataAddress>,
    pub reason: Option<String>,
}

impl ProtocolMessage {
    pub fn for_process(kind: MessageKind, process: &TransferProcess) -> Self {
        Self {
            kind,
            process_id: process.id,
            sender: process.transfer_type,
            correlation_id: process.correlation_id.clone(),
            counterparty_address: process.counterparty_address.clone(),
            protocol: process.protocol.clone(),
            contract_id: process.contract_id.clone(),
            asset_id: process.asset_id.clone(),
            data_address: None,
            destination: process.destination.clone(),
            reason: None,
        }
    }

    pub fn with_data_address(mut self, data_address: Option<DataAddress>) -> Self {
        self.data_address = data_address;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    /// Wire form of a non-request message as seen by the receiver
    pub fn to_event(&self) -> ProtocolEvent {
        ProtocolEvent {
            correlation_id: self.correlation_id.clone(),
            recipient: self.sender.counterparty(),
            kind: self.kind,
            data_address: self.data_address.clone(),
            reason: self.reason.clone(),
        }
    }

    /// Wire form of a transfer request; `callback_address` is where the
    /// provider sends subsequent messages
    pub fn to_inbound_request(&self, callback_address: &str) -> InboundRequest {
        InboundRequest {
            correlation_id: self.correlation_id.clone(),
            counterparty_address: callback_address.to_string(),
            protocol: Some(self.protocol.clone()),
            contract_id: self.contract_id.clone(),
            asset_id: self.asset_id.clone(),
            destination: self.destination.clone(),
            data_address: self.data_address.clone(),
        }
    }
}

/// Sends protocol messages to the counterparty
#[async_trait]
pub trait ProtocolGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    async fn send(&self, message: &ProtocolMessage) -> OpResult;
}

/// Provider-side data flow operations, idempotent by process id
#[async_trait]
pub trait DataPlane: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self, process: &TransferProcess) -> OpResult;

    async fn suspend(&self, process: &TransferProcess) -> OpResult;

    async fn terminate(&self, process: &TransferProcess) -> OpResult;

    async fn deprovision(&self, process: &TransferProcess) -> OpResult;
}

/// Map a peer HTTP status to a three-way result
///
/// 408 and 429 are 4xx but carry no verdict on the request itself.
pub fn classify_status(status: StatusCode, body: &str) -> OpResult {
    if status.is_success() {
        OpResult::Success
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        OpResult::Transient(format!("{}", status))
    } else if status.is_client_error() {
        OpResult::Failed(format!("{}: {}", status, body))
    } else {
        OpResult::Transient(format!("{}: {}", status, body))
    }
}

async fn post_json<T: Serialize + ?Sized>(client: &Client, url: &str, body: &T) -> OpResult {
    match client.post(url).json(body).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                return OpResult::Success;
            }
            let body = response.text().await.unwrap_or_default();
            classify_status(status, &body)
        }
        Err(e) => OpResult::Transient(e.to_string()),
    }
}

/// HTTP gateway speaking the connector's own protocol endpoints
///
/// - `Request` → `POST {address}/transfers/request` with an [`InboundRequest`]
/// - others → `POST {address}/transfers/{kind}` with a [`ProtocolEvent`]
pub struct HttpProtocolGateway {
    client: Client,
    callback_address: String,
}

impl HttpProtocolGateway {
    pub fn new(config: &ProtocolConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            callback_address: config.callback_address.clone(),
        })
    }

    fn url_for(message: &ProtocolMessage) -> String {
        format!(
            "{}/transfers/{}",
            message.counterparty_address.trim_end_matches('/'),
            message.kind.path_segment()
        )
    }
}

#[async_trait]
impl ProtocolGateway for HttpProtocolGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, message: &ProtocolMessage) -> OpResult {
        let url = Self::url_for(message);
        debug!(
            process_id = %message.process_id,
            kind = %message.kind,
            url = %url,
            "Sending protocol message"
        );

        let result = match message.kind {
            MessageKind::Request => {
                let body = message.to_inbound_request(&self.callback_address);
                post_json(&self.client, &url, &body).await
            }
            _ => post_json(&self.client, &url, &message.to_event()).await,
        };

        if !result.is_success() {
            warn!(
                process_id = %message.process_id,
                kind = %message.kind,
                result = ?result,
                "Protocol message not accepted"
            );
        }
        result
    }
}

/// Body posted to the data plane for every flow operation
#[derive(Debug, Serialize)]
struct FlowRequest<'a> {
    process_id: TransferProcessId,
    correlation_id: &'a str,
    contract_id: &'a str,
    asset_id: &'a str,
    source: Option<&'a DataAddress>,
    destination: Option<&'a DataAddress>,
}

impl<'a> From<&'a TransferProcess> for FlowRequest<'a> {
    fn from(p: &'a TransferProcess) -> Self {
        Self {
            process_id: p.id,
            correlation_id: &p.correlation_id,
            contract_id: &p.contract_id,
            asset_id: &p.asset_id,
            source: p.data_address.as_ref(),
            destination: p.destination.as_ref(),
        }
    }
}

/// Data plane reached over HTTP at `POST {base}/flows/{process_id}/{op}`
pub struct HttpDataPlane {
    client: Client,
    base_url: String,
}

impl HttpDataPlane {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn call(&self, op: &str, process: &TransferProcess) -> OpResult {
        let url = format!(
            "{}/flows/{}/{}",
            self.base_url.trim_end_matches('/'),
            process.id,
            op
        );
        debug!(process_id = %process.id, op, "Data plane call");
        post_json(&self.client, &url, &FlowRequest::from(process)).await
    }
}

#[async_trait]
impl DataPlane for HttpDataPlane {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn start(&self, process: &TransferProcess) -> OpResult {
        self.call("start", process).await
    }

    async fn suspend(&self, process: &TransferProcess) -> OpResult {
        self.call("suspend", process).await
    }

    async fn terminate(&self, process: &TransferProcess) -> OpResult {
        self.call("terminate", process).await
    }

    async fn deprovision(&self, process: &TransferProcess) -> OpResult {
        self.call("deprovision", process).await
    }
}

/// Data plane for deployments without one: every operation succeeds
#[derive(Debug, Default)]
pub struct NoopDataPlane;

#[async_trait]
impl DataPlane for NoopDataPlane {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn start(&self, _process: &TransferProcess) -> OpResult {
        OpResult::Success
    }

    async fn suspend(&self, _process: &TransferProcess) -> OpResult {
        OpResult::Success
    }

    async fn terminate(&self, _process: &TransferProcess) -> OpResult {
        OpResult::Success
    }

    async fn deprovision(&self, _process: &TransferProcess) -> OpResult {
        OpResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::TransferRequest;

    fn consumer() -> TransferProcess {
        TransferProcess::new_consumer(
            TransferRequest::new("http://provider/v1/protocol/", "contract", "asset")
                .with_destination(DataAddress::new("s3").with_property("bucket", "in")),
            0,
        )
    }

    #[test]
    fn test_op_result_predicates() {
        assert!(OpResult::Success.is_success());
        assert!(OpResult::Failed("x".into()).is_explicit_fail());
        assert!(OpResult::Transient("x".into()).is_transient());
        assert!(!OpResult::Transient("x".into()).is_explicit_fail());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK, ""), OpResult::Success);
        assert_eq!(classify_status(StatusCode::NO_CONTENT, ""), OpResult::Success);
        assert!(classify_status(StatusCode::BAD_REQUEST, "bad").is_explicit_fail());
        assert!(classify_status(StatusCode::CONFLICT, "").is_explicit_fail());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[test]
    fn test_message_wire_forms() {
        let p = consumer();
        let msg = ProtocolMessage::for_process(MessageKind::Request, &p);
        let req = msg.to_inbound_request("http://me/v1/protocol");
        assert_eq!(req.correlation_id, p.correlation_id);
        assert_eq!(req.counterparty_address, "http://me/v1/protocol");
        assert_eq!(req.destination, p.destination);
        assert!(req.validate().is_ok());

        let msg = ProtocolMessage::for_process(MessageKind::Termination, &p)
            .with_reason(Some("cancelled".into()));
        let event = msg.to_event();
        assert_eq!(event.recipient, TransferType::Provider);
        assert_eq!(event.kind, MessageKind::Termination);
        assert_eq!(event.reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let p = consumer();
        let msg = ProtocolMessage::for_process(MessageKind::Completion, &p);
        assert_eq!(
            HttpProtocolGateway::url_for(&msg),
            "http://provider/v1/protocol/transfers/completion"
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transient() {
        let config = ProtocolConfig {
            timeout_ms: 200,
            callback_address: "http://127.0.0.1:1".into(),
            data_plane_url: None,
        };
        let gateway = HttpProtocolGateway::new(&config).unwrap();
        let mut p = consumer();
        p.counterparty_address = "http://127.0.0.1:1".into();
        let result = gateway
            .send(&ProtocolMessage::for_process(MessageKind::Request, &p))
            .await;
        assert!(result.is_transient());
    }

    #[tokio::test]
    async fn test_noop_data_plane_succeeds() {
        let p = consumer();
        assert!(NoopDataPlane.start(&p).await.is_success());
        assert!(NoopDataPlane.deprovision(&p).await.is_success());
    }
}
