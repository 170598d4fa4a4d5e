//! State Machine
//!
//! Pure decision over a snapshot: `enter` runs the entry action for the
//! entity's current state and reports what should happen next. It never
//! writes to the store. Every action may run more than once for the same
//! snapshot, so outbound calls are keyed by correlation id / process id.

use std::sync::Arc;

use tracing::debug;

use super::gateway::{DataPlane, OpResult, ProtocolGateway, ProtocolMessage};
use super::state::TransferProcessState;
use super::types::{MessageKind, TransferProcess, TransferType};

/// Result of one entry action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Move along a table edge
    Advance(TransferProcessState),
    /// Stay, count a retry, try again after backoff
    Retry(String),
    /// Unrecoverable: go to the state's failure target
    Fatal(String),
    /// Resting state with nothing to do
    Idle,
}

pub struct StateMachine {
    gateway: Arc<dyn ProtocolGateway>,
    data_plane: Arc<dyn DataPlane>,
}

impl StateMachine {
    pub fn new(gateway: Arc<dyn ProtocolGateway>, data_plane: Arc<dyn DataPlane>) -> Self {
        Self {
            gateway,
            data_plane,
        }
    }

    pub async fn enter(&self, p: &TransferProcess) -> Outcome {
        // Termination pre-empts the forward pipeline
        if p.state.accepts_termination()
            && (p.has_pending("terminate") || p.has_received(MessageKind::Termination))
        {
            return Outcome::Advance(TransferProcessState::Terminating);
        }

        match self.run(p).await {
            Ok(outcome) | Err(outcome) => outcome,
        }
    }

    /// `Err` carries the outcome of the first failed outbound call
    async fn run(&self, p: &TransferProcess) -> Result<Outcome, Outcome> {
        use TransferProcessState::*;

        let provider = p.transfer_type == TransferType::Provider;
        let outcome = match p.state {
            Initial if provider => Outcome::Advance(Requested),
            Initial => Outcome::Advance(Requesting),

            Requesting if provider => {
                Outcome::Fatal("provider process cannot be in REQUESTING".to_string())
            }
            Requesting => {
                self.send(MessageKind::Request, p).await?;
                Outcome::Advance(Requested)
            }

            Requested if provider => {
                self.send(MessageKind::Acknowledgement, p).await?;
                Outcome::Advance(Starting)
            }
            Requested => {
                if p.has_received(MessageKind::Acknowledgement) || p.has_received(MessageKind::Start) {
                    Outcome::Advance(Starting)
                } else {
                    Outcome::Retry("awaiting acknowledgement from provider".to_string())
                }
            }

            Starting if provider => {
                check("data plane start", self.data_plane.start(p).await)?;
                self.send_start(p).await?;
                Outcome::Advance(Started)
            }
            Starting => {
                if p.has_received(MessageKind::Start) {
                    Outcome::Advance(Started)
                } else {
                    Outcome::Retry("awaiting start from provider".to_string())
                }
            }

            Started => {
                if p.has_pending("suspend") || p.has_received(MessageKind::Suspension) {
                    Outcome::Advance(Suspending)
                } else if p.has_pending("complete") || p.has_received(MessageKind::Completion) {
                    Outcome::Advance(Completing)
                } else {
                    Outcome::Idle
                }
            }

            Suspending => {
                if provider {
                    check("data plane suspend", self.data_plane.suspend(p).await)?;
                }
                if !p.has_received(MessageKind::Suspension) {
                    self.send(MessageKind::Suspension, p).await?;
                }
                Outcome::Advance(Suspended)
            }

            Suspended => {
                if p.has_pending("resume") || p.has_received(MessageKind::Start) {
                    Outcome::Advance(Resuming)
                } else {
                    Outcome::Idle
                }
            }

            Resuming if provider => {
                check("data plane start", self.data_plane.start(p).await)?;
                self.send_start(p).await?;
                Outcome::Advance(Started)
            }
            Resuming => {
                if !p.has_received(MessageKind::Start) {
                    self.send(MessageKind::Start, p).await?;
                }
                Outcome::Advance(Started)
            }

            Completing => {
                if !p.has_received(MessageKind::Completion) {
                    self.send(MessageKind::Completion, p).await?;
                }
                Outcome::Advance(Completed)
            }

            Terminating => {
                if provider {
                    check("data plane terminate", self.data_plane.terminate(p).await)?;
                }
                if !p.has_received(MessageKind::Termination) && counterparty_may_know(p) {
                    match self.send(MessageKind::Termination, p).await {
                        // A provider that never registered the request refuses the notice
                        Err(Outcome::Fatal(reason)) if !counterparty_knows(p) => debug!(
                            process_id = %p.id,
                            reason = %reason,
                            "Termination refused by counterparty that never saw the request"
                        ),
                        sent => sent?,
                    }
                }
                Outcome::Advance(Terminated)
            }

            Completed | Terminated => {
                if p.has_pending("deprovision") {
                    Outcome::Advance(Deprovisioning)
                } else {
                    Outcome::Idle
                }
            }

            Deprovisioning => {
                if provider {
                    check("data plane deprovision", self.data_plane.deprovision(p).await)?;
                }
                Outcome::Advance(Deprovisioned)
            }

            Deprovisioned => Outcome::Idle,
        };

        debug!(
            process_id = %p.id,
            state = %p.state,
            outcome = ?outcome,
            "Entry action evaluated"
        );
        Ok(outcome)
    }

    async fn send(&self, kind: MessageKind, p: &TransferProcess) -> Result<(), Outcome> {
        let mut message = ProtocolMessage::for_process(kind, p);
        if matches!(kind, MessageKind::Suspension | MessageKind::Termination) {
            message = message.with_reason(p.outbound_reason());
        }
        check(kind.as_str(), self.gateway.send(&message).await)
    }

    /// Provider start notification carries the source address
    async fn send_start(&self, p: &TransferProcess) -> Result<(), Outcome> {
        let message = ProtocolMessage::for_process(MessageKind::Start, p)
            .with_data_address(p.data_address.clone());
        check("START", self.gateway.send(&message).await)
    }
}

/// The counterparty confirmed the process
fn counterparty_knows(p: &TransferProcess) -> bool {
    p.transfer_type == TransferType::Provider
        || p.previous_states.contains(&TransferProcessState::Requested)
}

/// A consumer that attempted its request may have registered the process
/// with the provider even if it never saw the reply
fn counterparty_may_know(p: &TransferProcess) -> bool {
    counterparty_knows(p) || p.previous_states.contains(&TransferProcessState::Requesting)
}

fn check(what: &str, result: OpResult) -> Result<(), Outcome> {
    match result {
        OpResult::Success => Ok(()),
        OpResult::Failed(e) => Err(Outcome::Fatal(format!("{} rejected: {}", what, e))),
        OpResult::Transient(e) => Err(Outcome::Retry(format!("{} failed: {}", what, e))),
    }
}
