//! Dispatcher
//!
//! The execution loop that turns stored state into protocol action. Each
//! cycle scans for due entities, and for each candidate:
//!
//! 1. acquire the lease (skip if someone else holds it)
//! 2. reload the latest snapshot
//! 3. run the entry action (panics are caught)
//! 4. persist the outcome with the snapshot's version as CAS token; a state
//!    change that lost the race to a command or inbound message is
//!    reapplied on the fresh record
//! 5. publish an event if the state changed
//! 6. release the lease, on every path
//!
//! Multiple dispatchers, in-process or on other nodes, may run against the
//! same store. Leases keep them off the same entity; the version check keeps
//! a late writer from overwriting newer state.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::TransferError;
use super::events::{EventPublisher, NoopPublisher, TransferEvent};
use super::lease::{LeaseConfig, LeaseManager};
use super::machine::{Outcome, StateMachine};
use super::retry::RetryScheduler;
use super::state::TransferProcessState;
use super::store::TransferStore;
use super::types::{TransferProcess, TransferProcessId};

/// Per-cycle records go to this target so they can be filtered separately
pub const DISPATCH_TARGET: &str = "DISPATCH";

/// Reapplications of one outcome after lost version races
const MAX_REBASES: u32 = 4;

/// Configuration for the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Dispatcher loops started by the binary
    pub workers: usize,
    /// Sleep between scans that found less than a full batch
    pub poll_interval_ms: u64,
    /// Maximum candidates per scan
    pub batch_size: usize,
    /// Candidates processed concurrently within one scan
    pub concurrency: usize,
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 500,
            batch_size: 100,
            concurrency: 8,
        }
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Advanced {
        from: TransferProcessState,
        to: TransferProcessState,
    },
    Retried {
        retry_count: u32,
    },
    /// Retries exhausted, moved to the failure target
    Exhausted {
        to: TransferProcessState,
    },
    /// Fatal outcome, moved to the failure target
    Failed {
        to: TransferProcessState,
    },
    /// Resting state, pending flag cleared
    Idle,
    /// Lost the version race with no state change to keep; dropped
    Conflict,
    /// Another worker holds the lease
    LeaseContended,
    /// No longer due or dispatchable after reload
    NotDue,
    Vanished,
}

/// Counters for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub scanned: usize,
    pub advanced: usize,
    pub retried: usize,
    pub failed: usize,
    pub idle: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl DispatchStats {
    fn record(&mut self, result: &Result<DispatchResult, TransferError>) {
        match result {
            Ok(DispatchResult::Advanced { .. }) => self.advanced += 1,
            Ok(DispatchResult::Retried { .. }) => self.retried += 1,
            Ok(DispatchResult::Exhausted { .. }) | Ok(DispatchResult::Failed { .. }) => {
                self.failed += 1
            }
            Ok(DispatchResult::Idle) => self.idle += 1,
            Ok(DispatchResult::Conflict)
            | Ok(DispatchResult::LeaseContended)
            | Ok(DispatchResult::NotDue)
            | Ok(DispatchResult::Vanished) => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }
}

pub struct Dispatcher {
    worker_id: String,
    store: Arc<dyn TransferStore>,
    leases: Arc<dyn LeaseManager>,
    machine: Arc<StateMachine>,
    scheduler: RetryScheduler,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    lease_ttl: Duration,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TransferStore>,
        leases: Arc<dyn LeaseManager>,
        machine: Arc<StateMachine>,
        scheduler: RetryScheduler,
    ) -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            store,
            leases,
            machine,
            scheduler,
            publisher: Arc::new(NoopPublisher),
            clock: Arc::new(SystemClock),
            lease_ttl: LeaseConfig::default().ttl(),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker = %self.worker_id,
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Starting dispatcher"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let full_batch = match self.run_once().await {
                Ok(stats) => {
                    if stats.scanned > 0 {
                        debug!(target: DISPATCH_TARGET, worker = %self.worker_id, stats = ?stats, "Dispatch cycle");
                    }
                    stats.scanned >= self.config.batch_size
                }
                Err(e) => {
                    error!(worker = %self.worker_id, error = %e, "Dispatch scan failed");
                    false
                }
            };
            if full_batch {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!(worker = %self.worker_id, "Dispatcher stopped");
    }

    /// One scan: find due candidates and dispatch them with bounded concurrency
    pub async fn run_once(&self) -> Result<DispatchStats, TransferError> {
        let now = self.clock.now_millis();
        let candidates = self.store.find_due(now, self.config.batch_size).await?;

        let mut stats = DispatchStats {
            scanned: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return Ok(stats);
        }

        let results: Vec<_> = stream::iter(candidates.into_iter().map(|c| c.id))
            .map(|id| async move { (id, self.dispatch(id).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (id, result) in &results {
            if let Err(e) = result {
                error!(process_id = %id, worker = %self.worker_id, error = %e, "Dispatch failed");
            }
            stats.record(result);
        }
        Ok(stats)
    }

    /// Dispatch one entity under a lease
    pub async fn dispatch(&self, id: TransferProcessId) -> Result<DispatchResult, TransferError> {
        if !self.leases.acquire(id, &self.worker_id, self.lease_ttl).await? {
            debug!(target: DISPATCH_TARGET, process_id = %id, worker = %self.worker_id, "Lease held elsewhere");
            return Ok(DispatchResult::LeaseContended);
        }

        let result = self.process_leased(id).await;

        match self.leases.release(id, &self.worker_id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                process_id = %id,
                worker = %self.worker_id,
                "Lease expired and was reclaimed before release"
            ),
            Err(e) => warn!(
                process_id = %id,
                worker = %self.worker_id,
                error = %e,
                "Lease release failed; it will expire"
            ),
        }
        result
    }

    async fn process_leased(&self, id: TransferProcessId) -> Result<DispatchResult, TransferError> {
        let Some(snapshot) = self.store.find(id).await? else {
            return Ok(DispatchResult::Vanished);
        };
        if !snapshot.is_dispatchable() || !snapshot.is_due(self.clock.now_millis()) {
            return Ok(DispatchResult::NotDue);
        }

        let outcome = match AssertUnwindSafe(self.machine.enter(&snapshot))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload);
                error!(
                    process_id = %id,
                    state = %snapshot.state,
                    panic = %message,
                    "Entry action panicked"
                );
                Outcome::Retry(format!("action panicked: {}", message))
            }
        };

        let (mut next, mut result) = self.apply(&snapshot, outcome.clone());
        let mut rebases = 0;
        loop {
            match self.store.update(&next).await {
                Ok(stored) => {
                    if stored.state != snapshot.state {
                        info!(
                            process_id = %id,
                            from = %snapshot.state,
                            to = %stored.state,
                            version = stored.version,
                            "Transfer process advanced"
                        );
                        self.publisher
                            .publish(TransferEvent::transition(snapshot.state, &stored));
                    }
                    return Ok(result);
                }
                Err(e) if e.is_version_conflict() => {
                    match self.rebase_target(&snapshot, &next, rebases).await? {
                        Some(fresh) => {
                            rebases += 1;
                            debug!(
                                target: DISPATCH_TARGET,
                                process_id = %id,
                                version = fresh.version,
                                "Record changed during action - reapplying outcome"
                            );
                            (next, result) = self.apply(&fresh, outcome.clone());
                        }
                        None => {
                            debug!(
                                target: DISPATCH_TARGET,
                                process_id = %id,
                                version = snapshot.version,
                                "Record changed during action - dropping outcome"
                            );
                            return Ok(DispatchResult::Conflict);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fresh record to reapply a state change onto after a lost version race
    ///
    /// Commands and inbound messages only add a pending request or buffer a
    /// message, so an action that already produced its external effect still
    /// commits on top of them. Retries and idle outcomes are dropped instead:
    /// the fresh record is re-dispatched and its inputs are not discarded.
    async fn rebase_target(
        &self,
        snapshot: &TransferProcess,
        next: &TransferProcess,
        rebases: u32,
    ) -> Result<Option<TransferProcess>, TransferError> {
        if next.state == snapshot.state || rebases >= MAX_REBASES {
            return Ok(None);
        }
        let fresh = self.store.find(snapshot.id).await?;
        Ok(fresh.filter(|f| {
            f.state == snapshot.state
                && f.state_timestamp == snapshot.state_timestamp
                && f.retry_count == snapshot.retry_count
        }))
    }

    /// Fold an outcome into the next record
    fn apply(&self, snapshot: &TransferProcess, outcome: Outcome) -> (TransferProcess, DispatchResult) {
        let now = self.clock.now_millis();
        let mut next = snapshot.clone();

        let result = match outcome {
            Outcome::Advance(to) => match next.transition_to(to, now) {
                Ok(()) => DispatchResult::Advanced {
                    from: snapshot.state,
                    to,
                },
                Err(e) => {
                    error!(process_id = %snapshot.id, error = %e, "Entry action chose an invalid edge");
                    self.fail(&mut next, e.to_string(), now, false)
                }
            },
            Outcome::Retry(reason) => {
                let attempt = snapshot.retry_count + 1;
                if self.scheduler.is_exhausted(attempt) {
                    warn!(
                        process_id = %snapshot.id,
                        state = %snapshot.state,
                        attempts = attempt,
                        reason = %reason,
                        "Retries exhausted"
                    );
                    let detail = format!(
                        "retries exhausted after {} attempts in {}: {}",
                        attempt, snapshot.state, reason
                    );
                    self.fail(&mut next, detail, now, true)
                } else {
                    debug!(
                        target: DISPATCH_TARGET,
                        process_id = %snapshot.id,
                        state = %snapshot.state,
                        retry_count = attempt,
                        reason = %reason,
                        "Action will be retried"
                    );
                    next.record_retry(reason, now);
                    DispatchResult::Retried {
                        retry_count: attempt,
                    }
                }
            }
            Outcome::Fatal(reason) => {
                warn!(process_id = %snapshot.id, state = %snapshot.state, reason = %reason, "Fatal action error");
                self.fail(&mut next, reason, now, false)
            }
            Outcome::Idle => {
                Self::settle(&mut next);
                DispatchResult::Idle
            }
        };

        next.due_at = self.scheduler.next_attempt_at(now, next.retry_count);
        next.updated_at = now;
        (next, result)
    }

    fn fail(
        &self,
        next: &mut TransferProcess,
        reason: String,
        now: i64,
        exhausted: bool,
    ) -> DispatchResult {
        let Some(target) = next.state.failure_target() else {
            // Resting terminal state: nothing left to fail into
            error!(process_id = %next.id, state = %next.state, reason = %reason, "Failure in resting state");
            Self::settle(next);
            next.error_detail = Some(reason);
            return DispatchResult::Idle;
        };

        match next.fail_to(target, reason, now) {
            Ok(()) if exhausted => DispatchResult::Exhausted { to: target },
            Ok(()) => DispatchResult::Failed { to: target },
            Err(e) => {
                error!(process_id = %next.id, error = %e, "Failure target unreachable");
                Self::settle(next);
                DispatchResult::Idle
            }
        }
    }

    /// Drop inputs a resting state cannot act on
    fn settle(next: &mut TransferProcess) {
        next.pending_request = None;
        next.inbox.clear();
        next.pending = false;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::clock::ManualClock;
    use crate::transfer::coordinator::TransferCoordinator;
    use crate::transfer::events::QueuePublisher;
    use crate::transfer::gateway::OpResult;
    use crate::transfer::mock::{MockDataPlane, MockProtocolGateway};
    use crate::transfer::retry::RetryConfig;
    use crate::transfer::store::InMemoryTransferStore;
    use crate::transfer::types::{MessageKind, TransferRequest};
    use TransferProcessState::*;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryTransferStore>,
        gateway: Arc<MockProtocolGateway>,
        events: Arc<QueuePublisher>,
        coordinator: TransferCoordinator,
        dispatcher: Dispatcher,
    }

    fn harness(max_attempts: u32) -> Harness {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(InMemoryTransferStore::with_clock(clock.clone()));
        let gateway = Arc::new(MockProtocolGateway::new());
        let machine = Arc::new(StateMachine::new(gateway.clone(), Arc::new(MockDataPlane::new())));
        let events = Arc::new(QueuePublisher::new(64));
        let scheduler = RetryScheduler::new(RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts,
            jitter: false,
        });
        let dispatcher = Dispatcher::new(store.clone(), store.clone(), machine, scheduler)
            .with_worker_id("w1")
            .with_clock(clock.clone())
            .with_publisher(events.clone())
            .with_lease_ttl(Duration::from_secs(30));
        let coordinator = TransferCoordinator::with_clock(store.clone(), clock.clone());
        Harness {
            clock,
            store,
            gateway,
            events,
            coordinator,
            dispatcher,
        }
    }

    async fn created(h: &Harness) -> TransferProcess {
        h.coordinator
            .create(TransferRequest::new("http://provider", "contract", "asset"))
            .await
            .unwrap()
    }

    #[test]
    fn test_dispatcher_config_default() {
        let config = DispatcherConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_advance_persists_and_publishes() {
        let h = harness(3);
        let p = created(&h).await;

        let result = h.dispatcher.dispatch(p.id).await.unwrap();
        assert_eq!(
            result,
            DispatchResult::Advanced {
                from: Initial,
                to: Requesting
            }
        );

        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.state, Requesting);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.due_at, 10_000);
        assert!(stored.lease.is_none());

        let events = h.events.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_state, Initial);
        assert_eq!(events[0].new_state, Requesting);
    }

    #[tokio::test]
    async fn test_retry_schedules_backoff() {
        let h = harness(3);
        let p = created(&h).await;
        h.dispatcher.dispatch(p.id).await.unwrap();

        h.gateway.set_result(MessageKind::Request, OpResult::Transient("timeout".into()));
        let result = h.dispatcher.dispatch(p.id).await.unwrap();
        assert_eq!(result, DispatchResult::Retried { retry_count: 1 });

        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.due_at, 10_100);
        assert!(stored.error_detail.as_deref().unwrap().contains("timeout"));
        assert!(h.events.drain().len() == 1);

        // Not due yet
        assert_eq!(h.dispatcher.dispatch(p.id).await.unwrap(), DispatchResult::NotDue);
        assert_eq!(h.dispatcher.run_once().await.unwrap().scanned, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_after_exactly_max_attempts() {
        let h = harness(3);
        let p = created(&h).await;
        h.gateway.set_result(MessageKind::Request, OpResult::Transient("down".into()));

        for _ in 0..20 {
            let stored = h.store.find(p.id).await.unwrap().unwrap();
            if stored.state == Terminated {
                break;
            }
            h.clock.set(stored.due_at);
            h.dispatcher.run_once().await.unwrap();
        }

        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.state, Terminated);
        // One initial attempt plus three retries
        assert_eq!(h.gateway.sent_count(MessageKind::Request), 4);
        assert!(stored.error_detail.unwrap().contains("retries exhausted"));
        assert!(stored.previous_states.contains(&Terminating));
        // The request's outcome is unknown, so the provider is told
        assert_eq!(h.gateway.sent_count(MessageKind::Termination), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_records_error_detail() {
        let h = harness(1);
        let p = created(&h).await;
        h.dispatcher.dispatch(p.id).await.unwrap();
        h.gateway.set_result(MessageKind::Request, OpResult::Transient("down".into()));

        assert!(matches!(
            h.dispatcher.dispatch(p.id).await.unwrap(),
            DispatchResult::Retried { .. }
        ));
        h.clock.advance(Duration::from_secs(1));
        assert_eq!(
            h.dispatcher.dispatch(p.id).await.unwrap(),
            DispatchResult::Exhausted { to: Terminating }
        );
        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error_detail.unwrap().contains("retries exhausted"));
    }

    #[tokio::test]
    async fn test_fatal_moves_to_terminating() {
        let h = harness(3);
        let p = created(&h).await;
        h.dispatcher.dispatch(p.id).await.unwrap();
        h.gateway.set_result(MessageKind::Request, OpResult::Failed("unknown contract".into()));

        assert_eq!(
            h.dispatcher.dispatch(p.id).await.unwrap(),
            DispatchResult::Failed { to: Terminating }
        );
        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert!(stored.error_detail.unwrap().contains("unknown contract"));
    }

    #[tokio::test]
    async fn test_lease_contended_skips_without_action() {
        let h = harness(3);
        let p = created(&h).await;
        assert!(h.store.acquire(p.id, "other", Duration::from_secs(30)).await.unwrap());

        assert_eq!(
            h.dispatcher.dispatch(p.id).await.unwrap(),
            DispatchResult::LeaseContended
        );
        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.state, Initial);
        assert_eq!(stored.lease.unwrap().owner_id, "other");
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_lease_released() {
        let h = harness(3);
        let p = created(&h).await;
        h.dispatcher.dispatch(p.id).await.unwrap();
        h.gateway.set_panic_on(Some(MessageKind::Request));

        let result = h.dispatcher.dispatch(p.id).await.unwrap();
        assert_eq!(result, DispatchResult::Retried { retry_count: 1 });
        assert!(h.store.current(p.id).await.unwrap().is_none());
        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert!(stored.error_detail.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_request_in_flight_commits_before_termination() {
        let h = harness(3);
        let p = created(&h).await;
        h.dispatcher.dispatch(p.id).await.unwrap();
        h.gateway.set_delay(Some(Duration::from_millis(100)));

        let (result, terminated) = tokio::join!(h.dispatcher.dispatch(p.id), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.coordinator.terminate(p.id, None).await
        });
        assert_eq!(
            result.unwrap(),
            DispatchResult::Advanced {
                from: Requesting,
                to: Requested
            }
        );
        assert!(terminated.is_ok());

        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.state, Requested);
        assert!(stored.has_pending("terminate"));
        assert!(stored.lease.is_none());

        h.gateway.set_delay(None);
        h.dispatcher.dispatch(p.id).await.unwrap();
        h.dispatcher.dispatch(p.id).await.unwrap();

        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.state, Terminated);
        assert_eq!(
            stored.previous_states,
            vec![Initial, Requesting, Requested, Terminating]
        );
        assert_eq!(h.gateway.effect_count(MessageKind::Request), 1);
        assert_eq!(h.gateway.sent_count(MessageKind::Termination), 1);
    }

    #[tokio::test]
    async fn test_conflicting_retry_is_dropped() {
        let h = harness(3);
        let p = created(&h).await;
        h.dispatcher.dispatch(p.id).await.unwrap();
        h.gateway.set_result(MessageKind::Request, OpResult::Transient("timeout".into()));
        h.gateway.set_delay(Some(Duration::from_millis(100)));

        let (result, terminated) = tokio::join!(h.dispatcher.dispatch(p.id), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.coordinator.terminate(p.id, None).await
        });
        assert_eq!(result.unwrap(), DispatchResult::Conflict);
        assert!(terminated.is_ok());

        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert_eq!(stored.state, Requesting);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.has_pending("terminate"));
        assert!(stored.is_due(h.clock.now_millis()));
        assert!(stored.lease.is_none());
    }

    #[tokio::test]
    async fn test_idle_clears_pending() {
        let h = harness(3);
        let p = created(&h).await;
        let mut started = h.store.find(p.id).await.unwrap().unwrap();
        started.state = Started;
        started.pending = true;
        h.store.update(&started).await.unwrap();

        assert_eq!(h.dispatcher.dispatch(p.id).await.unwrap(), DispatchResult::Idle);
        let stored = h.store.find(p.id).await.unwrap().unwrap();
        assert!(!stored.pending);
        assert!(!stored.is_dispatchable());
        assert!(h.events.drain().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(3);
        created(&h).await;
        let (tx, rx) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(h.dispatcher.run(rx), stopper);

        let all = h.store.list(&Default::default()).await.unwrap();
        assert_ne!(all[0].state, Initial);
    }
}
