//! Mock gateways for tests and local runs
//!
//! - `MockProtocolGateway` records every send and lets tests script results
//! - `MockDataPlane` counts flow operations
//! - `LoopbackGateway` delivers messages straight into a coordinator, so a
//!   single node can play both consumer and provider

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::coordinator::TransferCoordinator;
use super::error::TransferError;
use super::gateway::{DataPlane, OpResult, ProtocolGateway, ProtocolMessage};
use super::types::{MessageKind, TransferProcess, TransferProcessId};

pub struct MockProtocolGateway {
    sent: Mutex<Vec<ProtocolMessage>>,
    /// Distinct (correlation, kind) pairs that were accepted
    effects: Mutex<HashSet<(String, MessageKind)>>,
    /// One-shot results consumed before `sticky`
    scripted: Mutex<HashMap<MessageKind, VecDeque<OpResult>>>,
    sticky: Mutex<HashMap<MessageKind, OpResult>>,
    panic_on: Mutex<Option<MessageKind>>,
    delay: Mutex<Option<Duration>>,
}

impl MockProtocolGateway {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            effects: Mutex::new(HashSet::new()),
            scripted: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            panic_on: Mutex::new(None),
            delay: Mutex::new(None),
        }
    }

    /// Every send of `kind` returns `result` until changed
    pub fn set_result(&self, kind: MessageKind, result: OpResult) {
        self.sticky.lock().unwrap().insert(kind, result);
    }

    pub fn clear_result(&self, kind: MessageKind) {
        self.sticky.lock().unwrap().remove(&kind);
    }

    /// The next send of `kind` returns `result`, then falls back
    pub fn push_result(&self, kind: MessageKind, result: OpResult) {
        self.scripted
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(result);
    }

    pub fn set_panic_on(&self, kind: Option<MessageKind>) {
        *self.panic_on.lock().unwrap() = kind;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self, kind: MessageKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == kind)
            .count()
    }

    pub fn sent_for(&self, process_id: TransferProcessId) -> Vec<MessageKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.process_id == process_id)
            .map(|m| m.kind)
            .collect()
    }

    /// Externally visible effects: each (correlation, kind) counts once
    pub fn effect_count(&self, kind: MessageKind) -> usize {
        self.effects
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k)| *k == kind)
            .count()
    }

    fn next_result(&self, kind: MessageKind) -> OpResult {
        if let Some(result) = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(|q| q.pop_front())
        {
            return result;
        }
        self.sticky
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or(OpResult::Success)
    }
}

impl Default for MockProtocolGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolGateway for MockProtocolGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, message: &ProtocolMessage) -> OpResult {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.panic_on.lock().unwrap() == Some(message.kind) {
            panic!("mock gateway panic on {}", message.kind);
        }

        self.sent.lock().unwrap().push(message.clone());
        let result = self.next_result(message.kind);
        if result.is_success() {
            self.effects
                .lock()
                .unwrap()
                .insert((message.correlation_id.clone(), message.kind));
        }
        result
    }
}

#[derive(Default)]
pub struct MockDataPlane {
    start_count: AtomicUsize,
    suspend_count: AtomicUsize,
    terminate_count: AtomicUsize,
    deprovision_count: AtomicUsize,
    started: Mutex<HashSet<TransferProcessId>>,
    results: Mutex<HashMap<&'static str, OpResult>>,
}

impl MockDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sticky result for `op` ("start", "suspend", "terminate", "deprovision")
    pub fn set_result(&self, op: &'static str, result: OpResult) {
        self.results.lock().unwrap().insert(op, result);
    }

    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    pub fn suspend_count(&self) -> usize {
        self.suspend_count.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminate_count.load(Ordering::SeqCst)
    }

    pub fn deprovision_count(&self) -> usize {
        self.deprovision_count.load(Ordering::SeqCst)
    }

    /// Flows currently running
    pub fn is_running(&self, id: TransferProcessId) -> bool {
        self.started.lock().unwrap().contains(&id)
    }

    fn result(&self, op: &'static str) -> OpResult {
        self.results
            .lock()
            .unwrap()
            .get(op)
            .cloned()
            .unwrap_or(OpResult::Success)
    }
}

#[async_trait]
impl DataPlane for MockDataPlane {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, process: &TransferProcess) -> OpResult {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        let result = self.result("start");
        if result.is_success() {
            self.started.lock().unwrap().insert(process.id);
        }
        result
    }

    async fn suspend(&self, process: &TransferProcess) -> OpResult {
        self.suspend_count.fetch_add(1, Ordering::SeqCst);
        let result = self.result("suspend");
        if result.is_success() {
            self.started.lock().unwrap().remove(&process.id);
        }
        result
    }

    async fn terminate(&self, process: &TransferProcess) -> OpResult {
        self.terminate_count.fetch_add(1, Ordering::SeqCst);
        let result = self.result("terminate");
        if result.is_success() {
            self.started.lock().unwrap().remove(&process.id);
        }
        result
    }

    async fn deprovision(&self, _process: &TransferProcess) -> OpResult {
        self.deprovision_count.fetch_add(1, Ordering::SeqCst);
        self.result("deprovision")
    }
}

/// Delivers outbound messages to a local coordinator
///
/// Consumer and provider processes for the same correlation id coexist in
/// one store, so a loopback node exercises both sides of the protocol.
pub struct LoopbackGateway {
    coordinator: Arc<TransferCoordinator>,
    callback_address: String,
}

impl LoopbackGateway {
    pub fn new(coordinator: Arc<TransferCoordinator>) -> Self {
        Self {
            coordinator,
            callback_address: "loopback".to_string(),
        }
    }

    fn to_result(result: Result<(), TransferError>) -> OpResult {
        match result {
            Ok(()) => OpResult::Success,
            Err(e) if (400..500).contains(&e.http_status()) => OpResult::Failed(e.to_string()),
            Err(e) => OpResult::Transient(e.to_string()),
        }
    }
}

#[async_trait]
impl ProtocolGateway for LoopbackGateway {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn send(&self, message: &ProtocolMessage) -> OpResult {
        let result = match message.kind {
            MessageKind::Request => self
                .coordinator
                .handle_request(message.to_inbound_request(&self.callback_address))
                .await
                .map(|_| ()),
            _ => self
                .coordinator
                .handle_message(message.to_event())
                .await
                .map(|_| ()),
        };
        Self::to_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::{TransferRequest, TransferType};

    fn process() -> TransferProcess {
        TransferProcess::new_consumer(TransferRequest::new("http://p", "c", "a"), 0)
    }

    #[tokio::test]
    async fn test_mock_gateway_scripted_then_sticky() {
        let gateway = MockProtocolGateway::new();
        let p = process();
        let msg = ProtocolMessage::for_process(MessageKind::Request, &p);

        gateway.set_result(MessageKind::Request, OpResult::Transient("down".into()));
        gateway.push_result(MessageKind::Request, OpResult::Success);

        assert!(gateway.send(&msg).await.is_success());
        assert!(gateway.send(&msg).await.is_transient());
        gateway.clear_result(MessageKind::Request);
        assert!(gateway.send(&msg).await.is_success());

        assert_eq!(gateway.sent_count(MessageKind::Request), 3);
        assert_eq!(gateway.effect_count(MessageKind::Request), 1);
        assert_eq!(gateway.sent_for(p.id).len(), 3);
    }

    #[tokio::test]
    async fn test_mock_data_plane_tracks_running_flows() {
        let dp = MockDataPlane::new();
        let p = process();
        assert!(dp.start(&p).await.is_success());
        assert!(dp.is_running(p.id));
        assert!(dp.terminate(&p).await.is_success());
        assert!(!dp.is_running(p.id));
        assert_eq!(dp.start_count(), 1);
        assert_eq!(dp.terminate_count(), 1);

        dp.set_result("start", OpResult::Failed("no capacity".into()));
        assert!(dp.start(&p).await.is_explicit_fail());
        assert!(!dp.is_running(p.id));
    }

    #[tokio::test]
    async fn test_loopback_creates_provider_process() {
        let store = Arc::new(crate::transfer::store::InMemoryTransferStore::new());
        let coordinator = Arc::new(TransferCoordinator::new(store.clone()));
        let gateway = LoopbackGateway::new(coordinator.clone());

        let consumer = coordinator
            .create(TransferRequest::new("loopback", "c", "a"))
            .await
            .unwrap();
        let msg = ProtocolMessage::for_process(MessageKind::Request, &consumer);
        assert!(gateway.send(&msg).await.is_success());
        assert!(gateway.send(&msg).await.is_success());

        let all = coordinator.list(&Default::default()).await.unwrap();
        let providers: Vec<_> = all
            .iter()
            .filter(|p| p.transfer_type == TransferType::Provider)
            .collect();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].correlation_id, consumer.correlation_id);

        // Completion is not meaningful for a provider in INITIAL
        let msg = ProtocolMessage::for_process(MessageKind::Completion, &consumer);
        assert!(gateway.send(&msg).await.is_explicit_fail());
    }
}
