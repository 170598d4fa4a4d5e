//! Transfer Coordinator
//!
//! Control-plane and inbound-protocol entry points. The coordinator never
//! changes `state` itself: it records what was asked for (a pending request,
//! a buffered inbound message) with a versioned write and makes the entity
//! due immediately. The dispatcher observes the record on its next cycle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::TransferError;
use super::state::TransferProcessState;
use super::store::TransferStore;
use super::types::{
    InboundRequest, MessageKind, PendingRequest, ProcessQuery, ProtocolEvent, TransferProcess,
    TransferProcessId, TransferRequest, TransferType,
};

/// Versioned writes retried on conflict before giving up
const MAX_CAS_ATTEMPTS: u32 = 8;

/// What a command decided after looking at the current record
enum Decision {
    /// Already requested or already reflected: no write
    Unchanged,
    Record(PendingRequest),
}

pub struct TransferCoordinator {
    store: Arc<dyn TransferStore>,
    clock: Arc<dyn Clock>,
}

impl TransferCoordinator {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn TransferStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    /// Create a consumer transfer process in INITIAL
    pub async fn create(&self, req: TransferRequest) -> Result<TransferProcess, TransferError> {
        req.validate()?;

        let process = TransferProcess::new_consumer(req, self.clock.now_millis());
        self.store.create(&process).await?;
        info!(
            process_id = %process.id,
            correlation_id = %process.correlation_id,
            counterparty = %process.counterparty_address,
            "Transfer process created"
        );
        Ok(process)
    }

    pub async fn get(&self, id: TransferProcessId) -> Result<TransferProcess, TransferError> {
        self.store
            .find(id)
            .await?
            .ok_or_else(|| TransferError::NotFound(id.to_string()))
    }

    pub async fn list(&self, query: &ProcessQuery) -> Result<Vec<TransferProcess>, TransferError> {
        self.store.list(query).await
    }

    /// Request termination; accepted from any state that is not terminal
    pub async fn terminate(
        &self,
        id: TransferProcessId,
        reason: Option<String>,
    ) -> Result<TransferProcess, TransferError> {
        self.command(id, "terminate", |p| {
            if p.state == TransferProcessState::Terminating || p.has_pending("terminate") {
                return Ok(Decision::Unchanged);
            }
            if !p.state.accepts_termination() {
                return Err(invalid_state(p, "terminate"));
            }
            Ok(Decision::Record(PendingRequest::Terminate {
                reason: reason.clone(),
            }))
        })
        .await
    }

    pub async fn suspend(
        &self,
        id: TransferProcessId,
        reason: Option<String>,
    ) -> Result<TransferProcess, TransferError> {
        self.command(id, "suspend", |p| {
            gated(
                p,
                "suspend",
                &[TransferProcessState::Started],
                &[TransferProcessState::Suspending, TransferProcessState::Suspended],
                PendingRequest::Suspend {
                    reason: reason.clone(),
                },
            )
        })
        .await
    }

    pub async fn resume(&self, id: TransferProcessId) -> Result<TransferProcess, TransferError> {
        self.command(id, "resume", |p| {
            gated(
                p,
                "resume",
                &[TransferProcessState::Suspended],
                &[TransferProcessState::Resuming],
                PendingRequest::Resume,
            )
        })
        .await
    }

    pub async fn complete(&self, id: TransferProcessId) -> Result<TransferProcess, TransferError> {
        self.command(id, "complete", |p| {
            gated(
                p,
                "complete",
                &[TransferProcessState::Started],
                &[TransferProcessState::Completing, TransferProcessState::Completed],
                PendingRequest::Complete,
            )
        })
        .await
    }

    pub async fn deprovision(
        &self,
        id: TransferProcessId,
    ) -> Result<TransferProcess, TransferError> {
        self.command(id, "deprovision", |p| {
            gated(
                p,
                "deprovision",
                &[TransferProcessState::Completed, TransferProcessState::Terminated],
                &[
                    TransferProcessState::Deprovisioning,
                    TransferProcessState::Deprovisioned,
                ],
                PendingRequest::Deprovision,
            )
        })
        .await
    }

    /// Inbound transfer request from a consumer
    ///
    /// Creates a PROVIDER process in INITIAL. A repeated request with the
    /// same correlation id returns the existing process.
    pub async fn handle_request(
        &self,
        req: InboundRequest,
    ) -> Result<TransferProcess, TransferError> {
        req.validate()?;

        if let Some(existing) = self
            .store
            .find_by_correlation(&req.correlation_id, TransferType::Provider)
            .await?
        {
            debug!(
                process_id = %existing.id,
                correlation_id = %req.correlation_id,
                "Duplicate transfer request - returning existing process"
            );
            return Ok(existing);
        }

        let correlation_id = req.correlation_id.clone();
        let process = TransferProcess::new_provider(req, self.clock.now_millis());
        match self.store.create(&process).await {
            Ok(()) => {
                info!(
                    process_id = %process.id,
                    correlation_id = %process.correlation_id,
                    "Provider transfer process created"
                );
                Ok(process)
            }
            // Lost a race with a concurrent delivery of the same request
            Err(TransferError::DuplicateProcess(_)) => self
                .store
                .find_by_correlation(&correlation_id, TransferType::Provider)
                .await?
                .ok_or_else(|| TransferError::NotFound(format!("correlation {}", correlation_id))),
            Err(e) => Err(e),
        }
    }

    /// Inbound protocol message for one of our processes
    ///
    /// Returns `true` if the message was buffered, `false` if it was a
    /// duplicate or its effect is already reflected in the entity.
    pub async fn handle_message(&self, event: ProtocolEvent) -> Result<bool, TransferError> {
        if event.kind == MessageKind::Request {
            return Err(TransferError::InvalidRequest(
                "transfer requests use the request endpoint".to_string(),
            ));
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .find_by_correlation(&event.correlation_id, event.recipient)
                .await?
                .ok_or_else(|| {
                    TransferError::NotFound(format!("correlation {}", event.correlation_id))
                })?;

            if current.has_received(event.kind) || current.already_reflects(event.kind) {
                debug!(
                    process_id = %current.id,
                    kind = %event.kind,
                    state = %current.state,
                    "Duplicate protocol message ignored"
                );
                return Ok(false);
            }
            if !current.accepts_message(event.kind) {
                warn!(
                    process_id = %current.id,
                    kind = %event.kind,
                    state = %current.state,
                    "Protocol message rejected in current state"
                );
                return Err(TransferError::UnexpectedMessage {
                    id: current.id.to_string(),
                    state: current.state,
                    kind: event.kind,
                });
            }

            let mut next = current.clone();
            next.inbox.push(event.kind);
            if event.kind == MessageKind::Start && event.data_address.is_some() {
                next.data_address = event.data_address.clone();
            }
            if event.reason.is_some() {
                next.transition_reason = event.reason.clone();
            }
            self.touch(&mut next);

            match self.store.update(&next).await {
                Ok(stored) => {
                    info!(
                        process_id = %stored.id,
                        kind = %event.kind,
                        state = %stored.state,
                        "Protocol message buffered"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_version_conflict() => continue,
                Err(e) => return Err(e),
            }
        }

        Err(TransferError::SystemError(format!(
            "message for correlation {} not recorded after {} attempts",
            event.correlation_id, MAX_CAS_ATTEMPTS
        )))
    }

    /// Read-decide-write loop shared by the control commands
    async fn command<F>(
        &self,
        id: TransferProcessId,
        action: &'static str,
        decide: F,
    ) -> Result<TransferProcess, TransferError>
    where
        F: Fn(&TransferProcess) -> Result<Decision, TransferError>,
    {
        let mut last_conflict = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(id).await?;
            let request = match decide(&current)? {
                Decision::Unchanged => return Ok(current),
                Decision::Record(request) => request,
            };

            let mut next = current.clone();
            next.pending_request = Some(request);
            self.touch(&mut next);

            match self.store.update(&next).await {
                Ok(stored) => {
                    info!(
                        process_id = %id,
                        state = %stored.state,
                        action,
                        "Control request recorded"
                    );
                    return Ok(stored);
                }
                Err(e) if e.is_version_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| TransferError::SystemError(action.to_string())))
    }

    /// Mark the record pending and due now
    fn touch(&self, next: &mut TransferProcess) {
        let now = self.clock.now_millis();
        next.refresh_pending();
        next.due_at = next.due_at.min(now);
        next.updated_at = now;
    }
}

fn invalid_state(p: &TransferProcess, action: &'static str) -> TransferError {
    TransferError::InvalidState {
        id: p.id.to_string(),
        state: p.state,
        action,
    }
}

/// Shared gating for suspend / resume / complete / deprovision
fn gated(
    p: &TransferProcess,
    action: &'static str,
    from: &[TransferProcessState],
    reflected: &[TransferProcessState],
    request: PendingRequest,
) -> Result<Decision, TransferError> {
    if p.has_pending(action) || reflected.contains(&p.state) {
        return Ok(Decision::Unchanged);
    }
    if let Some(other) = &p.pending_request {
        return Err(TransferError::RequestPending {
            id: p.id.to_string(),
            pending: other.name(),
        });
    }
    if !from.contains(&p.state) {
        return Err(invalid_state(p, action));
    }
    Ok(Decision::Record(request))
}
