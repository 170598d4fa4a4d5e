//! Transfer Process Core Types
//!
//! The `TransferProcess` entity and the value types that travel with it.
//! All timestamps are Unix milliseconds.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::TransferError;
use super::state::TransferProcessState;

/// Default wire protocol identifier carried on outbound messages
pub const DEFAULT_PROTOCOL: &str = "dataspace-protocol-http";

/// Transfer process ID - ULID-based unique identifier
///
/// ULIDs sort by creation time, which keeps list queries stable without a
/// separate sequence column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferProcessId(ulid::Ulid);

impl TransferProcessId {
    /// Generate a new unique TransferProcessId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferProcessId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s)
            .map(Self)
            .map_err(|_| TransferError::InvalidId(s.to_string()))
    }
}

impl Serialize for TransferProcessId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TransferProcessId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which side of the transfer this connector plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransferType {
    Consumer = 1,
    Provider = 2,
}

impl TransferType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransferType::Consumer),
            2 => Some(TransferType::Provider),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Consumer => "CONSUMER",
            TransferType::Provider => "PROVIDER",
        }
    }

    /// The role of the counterparty
    pub fn counterparty(&self) -> Self {
        match self {
            TransferType::Consumer => TransferType::Provider,
            TransferType::Provider => TransferType::Consumer,
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data-plane addressing information. Opaque to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataAddress {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl DataAddress {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Time-bounded ownership marker persisted next to the entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner_id: String,
    pub expires_at: i64,
}

impl Lease {
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    #[inline]
    pub fn is_held_by(&self, owner_id: &str, now: i64) -> bool {
        self.owner_id == owner_id && !self.is_expired(now)
    }
}

/// Protocol message kinds, in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Consumer → provider: please transfer
    Request,
    /// Provider → consumer: request accepted
    Acknowledgement,
    /// Data flow started (provider) or resume requested (consumer)
    Start,
    Suspension,
    Completion,
    Termination,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "REQUEST",
            MessageKind::Acknowledgement => "ACKNOWLEDGEMENT",
            MessageKind::Start => "START",
            MessageKind::Suspension => "SUSPENSION",
            MessageKind::Completion => "COMPLETION",
            MessageKind::Termination => "TERMINATION",
        }
    }

    /// URL path segment used by the HTTP gateway
    pub fn path_segment(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Acknowledgement => "acknowledgement",
            MessageKind::Start => "start",
            MessageKind::Suspension => "suspension",
            MessageKind::Completion => "completion",
            MessageKind::Termination => "termination",
        }
    }

    /// Buffered inbound messages consumed when the entity enters `state`
    fn consumed_on_entry(state: TransferProcessState) -> &'static [MessageKind] {
        match state {
            TransferProcessState::Starting => &[MessageKind::Acknowledgement],
            TransferProcessState::Started => &[MessageKind::Start],
            TransferProcessState::Suspended => &[MessageKind::Suspension],
            TransferProcessState::Completed => &[MessageKind::Completion],
            TransferProcessState::Terminated => &[MessageKind::Termination],
            _ => &[],
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Control-plane request waiting to be observed by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingRequest {
    Terminate { reason: Option<String> },
    Suspend { reason: Option<String> },
    Resume,
    Complete,
    Deprovision,
}

impl PendingRequest {
    /// State entered when the request is honoured
    pub fn target(&self) -> TransferProcessState {
        match self {
            PendingRequest::Terminate { .. } => TransferProcessState::Terminating,
            PendingRequest::Suspend { .. } => TransferProcessState::Suspending,
            PendingRequest::Resume => TransferProcessState::Resuming,
            PendingRequest::Complete => TransferProcessState::Completing,
            PendingRequest::Deprovision => TransferProcessState::Deprovisioning,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PendingRequest::Terminate { reason } | PendingRequest::Suspend { reason } => {
                reason.as_deref()
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PendingRequest::Terminate { .. } => "terminate",
            PendingRequest::Suspend { .. } => "suspend",
            PendingRequest::Resume => "resume",
            PendingRequest::Complete => "complete",
            PendingRequest::Deprovision => "deprovision",
        }
    }
}

/// Control-plane create request (consumer side)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Base URL of the counterparty's protocol endpoint
    pub counterparty_address: String,
    #[serde(default)]
    pub protocol: Option<String>,
    pub contract_id: String,
    pub asset_id: String,
    #[serde(default)]
    pub destination: Option<DataAddress>,
}

impl TransferRequest {
    pub fn new(
        counterparty_address: impl Into<String>,
        contract_id: impl Into<String>,
        asset_id: impl Into<String>,
    ) -> Self {
        Self {
            counterparty_address: counterparty_address.into(),
            protocol: None,
            contract_id: contract_id.into(),
            asset_id: asset_id.into(),
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: DataAddress) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        require_non_empty("counterparty_address", &self.counterparty_address)?;
        require_non_empty("contract_id", &self.contract_id)?;
        require_non_empty("asset_id", &self.asset_id)
    }
}

/// Inbound transfer request from a consumer (creates a provider process)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    pub correlation_id: String,
    /// Consumer callback address for subsequent messages
    pub counterparty_address: String,
    #[serde(default)]
    pub protocol: Option<String>,
    pub contract_id: String,
    pub asset_id: String,
    #[serde(default)]
    pub destination: Option<DataAddress>,
    /// Source address resolved for the asset, if known
    #[serde(default)]
    pub data_address: Option<DataAddress>,
}

impl InboundRequest {
    pub fn validate(&self) -> Result<(), TransferError> {
        require_non_empty("correlation_id", &self.correlation_id)?;
        require_non_empty("counterparty_address", &self.counterparty_address)?;
        require_non_empty("contract_id", &self.contract_id)?;
        require_non_empty("asset_id", &self.asset_id)
    }
}

/// Validated inbound protocol message, correlated by `correlation_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEvent {
    pub correlation_id: String,
    /// Which of our processes the message addresses
    pub recipient: TransferType,
    pub kind: MessageKind,
    #[serde(default)]
    pub data_address: Option<DataAddress>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ProtocolEvent {
    pub fn new(correlation_id: impl Into<String>, recipient: TransferType, kind: MessageKind) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            recipient,
            kind,
            data_address: None,
            reason: None,
        }
    }
}

/// List filter for the control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessQuery {
    #[serde(default)]
    pub state: Option<TransferProcessState>,
    #[serde(default)]
    pub transfer_type: Option<TransferType>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ProcessQuery {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn matches(&self, process: &TransferProcess) -> bool {
        self.state.is_none_or(|s| s == process.state)
            && self.transfer_type.is_none_or(|t| t == process.transfer_type)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(1000)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), TransferError> {
    if value.trim().is_empty() {
        return Err(TransferError::InvalidRequest(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

/// Transfer process record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProcess {
    pub id: TransferProcessId,
    pub transfer_type: TransferType,
    pub state: TransferProcessState,
    /// Optimistic concurrency token, +1 per committed write
    pub version: i64,
    /// Failed attempts on the current state's action
    pub retry_count: u32,
    /// Entry into the current state; retries leave it untouched
    pub state_timestamp: i64,
    /// Last attempt + `backoff(retry_count)`, maintained by the dispatcher
    pub due_at: i64,
    pub correlation_id: String,
    pub counterparty_address: String,
    pub protocol: String,
    pub contract_id: String,
    pub asset_id: String,
    pub data_address: Option<DataAddress>,
    pub destination: Option<DataAddress>,
    pub error_detail: Option<String>,
    /// Reason attached to the last honoured control request
    pub transition_reason: Option<String>,
    /// Unobserved request or inbound message
    pub pending: bool,
    pub pending_request: Option<PendingRequest>,
    /// Buffered inbound messages not yet consumed by a guard
    pub inbox: Vec<MessageKind>,
    pub previous_states: Vec<TransferProcessState>,
    pub lease: Option<Lease>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransferProcess {
    /// Create a consumer process in INITIAL state with a fresh correlation id
    pub fn new_consumer(req: TransferRequest, now: i64) -> Self {
        Self {
            id: TransferProcessId::new(),
            transfer_type: TransferType::Consumer,
            state: TransferProcessState::Initial,
            version: 1,
            retry_count: 0,
            state_timestamp: now,
            due_at: now,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            counterparty_address: req.counterparty_address,
            protocol: req.protocol.unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            contract_id: req.contract_id,
            asset_id: req.asset_id,
            data_address: None,
            destination: req.destination,
            error_detail: None,
            transition_reason: None,
            pending: false,
            pending_request: None,
            inbox: Vec::new(),
            previous_states: Vec::new(),
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a provider process in INITIAL state for an inbound request
    pub fn new_provider(req: InboundRequest, now: i64) -> Self {
        Self {
            id: TransferProcessId::new(),
            transfer_type: TransferType::Provider,
            state: TransferProcessState::Initial,
            version: 1,
            retry_count: 0,
            state_timestamp: now,
            due_at: now,
            correlation_id: req.correlation_id,
            counterparty_address: req.counterparty_address,
            protocol: req.protocol.unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            contract_id: req.contract_id,
            asset_id: req.asset_id,
            data_address: req.data_address,
            destination: req.destination,
            error_detail: None,
            transition_reason: None,
            pending: false,
            pending_request: None,
            inbox: Vec::new(),
            previous_states: Vec::new(),
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` along a table edge
    ///
    /// Resets the retry counter, consumes the buffered messages and control
    /// request that drove the edge, and clears the error unless the entity is
    /// winding down (the failure that led there is kept for audit).
    pub fn transition_to(
        &mut self,
        next: TransferProcessState,
        now: i64,
    ) -> Result<(), TransferError> {
        if !self.state.can_transition_to(next) {
            return Err(TransferError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }

        self.previous_states.push(self.state);
        self.state = next;
        self.retry_count = 0;
        if !matches!(
            next,
            TransferProcessState::Terminated
                | TransferProcessState::Deprovisioning
                | TransferProcessState::Deprovisioned
        ) {
            self.error_detail = None;
        }
        self.state_timestamp = now;

        let consumed = MessageKind::consumed_on_entry(next);
        self.inbox.retain(|kind| !consumed.contains(kind));

        if let Some(request) = &self.pending_request
            && request.target() == next
        {
            self.transition_reason = request.reason().map(str::to_string);
            self.pending_request = None;
        }
        // A request that can no longer be honoured from the new state is dropped
        if let Some(request) = &self.pending_request
            && !next.can_transition_to(request.target())
        {
            self.pending_request = None;
        }

        self.refresh_pending();
        Ok(())
    }

    /// Record a failed attempt that did not advance the state
    pub fn record_retry(&mut self, reason: impl Into<String>, now: i64) {
        self.retry_count += 1;
        self.error_detail = Some(reason.into());
        self.updated_at = now;
    }

    /// Transition to a failure target and keep the failure description
    pub fn fail_to(
        &mut self,
        target: TransferProcessState,
        reason: impl Into<String>,
        now: i64,
    ) -> Result<(), TransferError> {
        self.transition_to(target, now)?;
        self.error_detail = Some(reason.into());
        Ok(())
    }

    #[inline]
    pub fn refresh_pending(&mut self) {
        self.pending = self.pending_request.is_some() || !self.inbox.is_empty();
    }

    #[inline]
    pub fn has_received(&self, kind: MessageKind) -> bool {
        self.inbox.contains(&kind)
    }

    #[inline]
    pub fn has_pending(&self, name: &str) -> bool {
        self.pending_request
            .as_ref()
            .is_some_and(|r| r.name() == name)
    }

    /// Whether an inbound message of `kind` is meaningful in the current state
    pub fn accepts_message(&self, kind: MessageKind) -> bool {
        use TransferProcessState::*;
        match (self.transfer_type, kind) {
            (_, MessageKind::Request) => false,
            (_, MessageKind::Termination) => self.state.accepts_termination(),
            (_, MessageKind::Suspension) | (_, MessageKind::Completion) => self.state == Started,
            (TransferType::Consumer, MessageKind::Acknowledgement) => {
                matches!(self.state, Requesting | Requested)
            }
            (TransferType::Consumer, MessageKind::Start) => matches!(
                self.state,
                Requesting | Requested | Starting | Suspended | Resuming
            ),
            (TransferType::Provider, MessageKind::Start) => self.state == Suspended,
            (TransferType::Provider, MessageKind::Acknowledgement) => false,
        }
    }

    /// Whether the entity already moved past the point `kind` would drive it
    /// to, so a redelivered message can be acknowledged without effect
    pub fn already_reflects(&self, kind: MessageKind) -> bool {
        use TransferProcessState::*;
        match kind {
            MessageKind::Request => false,
            MessageKind::Acknowledgement => {
                self.transfer_type == TransferType::Consumer && matches!(self.state, Starting | Started)
            }
            MessageKind::Start => self.state == Started,
            MessageKind::Suspension => matches!(self.state, Suspending | Suspended),
            MessageKind::Completion => matches!(self.state, Completing | Completed),
            MessageKind::Termination => matches!(self.state, Terminating | Terminated),
        }
    }

    /// Eligible for the dispatcher at all (ignoring time and lease)
    #[inline]
    pub fn is_dispatchable(&self) -> bool {
        !self.state.is_resting() || (self.pending && self.state != TransferProcessState::Deprovisioned)
    }

    #[inline]
    pub fn is_due(&self, now: i64) -> bool {
        self.due_at <= now
    }

    #[inline]
    pub fn is_leased(&self, now: i64) -> bool {
        self.lease.as_ref().is_some_and(|l| !l.is_expired(now))
    }

    /// Reason to put on an outbound suspension / termination message
    pub fn outbound_reason(&self) -> Option<String> {
        self.transition_reason
            .clone()
            .or_else(|| self.error_detail.clone())
    }
}

impl fmt::Display for TransferProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransferProcess[{}] {} state={} v{} retries={} corr={}",
            self.id,
            self.transfer_type,
            self.state,
            self.version,
            self.retry_count,
            self.correlation_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransferProcessState::*;

    fn consumer() -> TransferProcess {
        TransferProcess::new_consumer(
            TransferRequest::new("http://provider/protocol", "contract-1", "asset-1"),
            1_000,
        )
    }

    #[test]
    fn test_new_consumer_defaults() {
        let p = consumer();
        assert_eq!(p.state, Initial);
        assert_eq!(p.transfer_type, TransferType::Consumer);
        assert_eq!(p.version, 1);
        assert_eq!(p.retry_count, 0);
        assert_eq!(p.due_at, 1_000);
        assert_eq!(p.protocol, DEFAULT_PROTOCOL);
        assert!(!p.correlation_id.is_empty());
        assert!(p.error_detail.is_none());
        assert!(p.is_dispatchable());
    }

    #[test]
    fn test_transition_resets_retry_and_error() {
        let mut p = consumer();
        p.record_retry("timeout", 2_000);
        p.record_retry("timeout", 3_000);
        assert_eq!(p.retry_count, 2);
        // Still reports when INITIAL was entered
        assert_eq!(p.state_timestamp, 1_000);
        assert_eq!(p.updated_at, 3_000);

        p.transition_to(Requesting, 4_000).unwrap();
        assert_eq!(p.retry_count, 0);
        assert!(p.error_detail.is_none());
        assert_eq!(p.state_timestamp, 4_000);
        assert_eq!(p.previous_states, vec![Initial]);
    }

    #[test]
    fn test_transition_rejects_edges_outside_table() {
        let mut p = consumer();
        let err = p.transition_to(Started, 2_000).unwrap_err();
        assert!(matches!(
            err,
            TransferError::InvalidStateTransition {
                from: Initial,
                to: Started
            }
        ));
        assert_eq!(p.state, Initial);
        assert!(p.previous_states.is_empty());
    }

    #[test]
    fn test_transition_consumes_inbox_and_request() {
        let mut p = consumer();
        p.state = Requested;
        p.inbox = vec![MessageKind::Acknowledgement, MessageKind::Start];
        p.refresh_pending();

        p.transition_to(Starting, 2_000).unwrap();
        assert_eq!(p.inbox, vec![MessageKind::Start]);

        p.transition_to(Started, 3_000).unwrap();
        assert!(p.inbox.is_empty());
        assert!(!p.pending);

        p.pending_request = Some(PendingRequest::Terminate {
            reason: Some("operator".into()),
        });
        p.transition_to(Terminating, 4_000).unwrap();
        assert!(p.pending_request.is_none());
        assert_eq!(p.transition_reason.as_deref(), Some("operator"));
        assert!(p.error_detail.is_none());
    }

    #[test]
    fn test_fail_to_keeps_error_detail() {
        let mut p = consumer();
        p.state = Requesting;
        p.fail_to(Terminating, "rejected by provider", 5_000).unwrap();
        assert_eq!(p.state, Terminating);
        assert_eq!(p.error_detail.as_deref(), Some("rejected by provider"));
        assert_eq!(p.retry_count, 0);
    }

    #[test]
    fn test_failure_detail_survives_termination() {
        let mut p = consumer();
        p.state = Requesting;
        p.fail_to(Terminating, "retries exhausted", 5_000).unwrap();
        p.transition_to(Terminated, 6_000).unwrap();
        assert_eq!(p.error_detail.as_deref(), Some("retries exhausted"));

        let mut p = consumer();
        p.state = Started;
        p.pending_request = Some(PendingRequest::Terminate { reason: None });
        p.transition_to(Terminating, 2_000).unwrap();
        p.transition_to(Terminated, 3_000).unwrap();
        assert!(p.error_detail.is_none());
    }

    #[test]
    fn test_accepts_message_by_state() {
        let mut p = consumer();
        p.state = Requesting;
        assert!(p.accepts_message(MessageKind::Acknowledgement));
        assert!(p.accepts_message(MessageKind::Start));
        assert!(!p.accepts_message(MessageKind::Completion));
        assert!(p.accepts_message(MessageKind::Termination));

        p.state = Started;
        assert!(p.accepts_message(MessageKind::Completion));
        assert!(p.accepts_message(MessageKind::Suspension));
        assert!(!p.accepts_message(MessageKind::Acknowledgement));

        p.state = Terminated;
        assert!(!p.accepts_message(MessageKind::Termination));
        assert!(!p.accepts_message(MessageKind::Start));
    }

    #[test]
    fn test_already_reflects_redelivered_messages() {
        let mut p = consumer();
        p.state = Started;
        assert!(p.already_reflects(MessageKind::Start));
        assert!(p.already_reflects(MessageKind::Acknowledgement));
        assert!(!p.already_reflects(MessageKind::Completion));

        p.state = Terminated;
        assert!(p.already_reflects(MessageKind::Termination));

        p.transfer_type = TransferType::Provider;
        p.state = Started;
        assert!(!p.already_reflects(MessageKind::Acknowledgement));
    }

    #[test]
    fn test_resting_states_need_pending_to_dispatch() {
        let mut p = consumer();
        p.state = Started;
        assert!(!p.is_dispatchable());
        p.pending = true;
        assert!(p.is_dispatchable());
        p.state = Deprovisioned;
        assert!(!p.is_dispatchable());
    }

    #[test]
    fn test_lease_expiry() {
        let lease = Lease {
            owner_id: "w1".into(),
            expires_at: 10,
        };
        assert!(!lease.is_expired(9));
        assert!(lease.is_expired(10));
        assert!(lease.is_held_by("w1", 5));
        assert!(!lease.is_held_by("w2", 5));
    }

    #[test]
    fn test_id_parse_and_serde() {
        let id = TransferProcessId::new();
        let parsed: TransferProcessId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<TransferProcessId>().is_err());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_request_validation() {
        assert!(TransferRequest::new("http://p", "c", "a").validate().is_ok());
        assert!(TransferRequest::new("", "c", "a").validate().is_err());
        assert!(TransferRequest::new("http://p", " ", "a").validate().is_err());
    }

    #[test]
    fn test_process_query_matches() {
        let p = consumer();
        let q = ProcessQuery {
            state: Some(Initial),
            ..Default::default()
        };
        assert!(q.matches(&p));
        let q = ProcessQuery {
            transfer_type: Some(TransferType::Provider),
            ..Default::default()
        };
        assert!(!q.matches(&p));
        assert_eq!(ProcessQuery::default().effective_limit(), 50);
    }
}
