//! Event Publisher
//!
//! Fire-and-forget notification of committed state changes. Publishing
//! happens after the versioned write succeeded, is best-effort, and never
//! blocks or fails the dispatcher.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::state::TransferProcessState;
use super::types::{TransferProcess, TransferProcessId, TransferType};

/// Default buffer for in-process subscribers
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// A committed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub process_id: TransferProcessId,
    pub transfer_type: TransferType,
    pub correlation_id: String,
    pub previous_state: TransferProcessState,
    pub new_state: TransferProcessState,
    pub version: i64,
    pub timestamp: i64,
    pub error_detail: Option<String>,
}

impl TransferEvent {
    /// Build from the stored record after a committed transition
    pub fn transition(previous_state: TransferProcessState, stored: &TransferProcess) -> Self {
        Self {
            process_id: stored.id,
            transfer_type: stored.transfer_type,
            correlation_id: stored.correlation_id.clone(),
            previous_state,
            new_state: stored.state,
            version: stored.version,
            timestamp: stored.state_timestamp,
            error_detail: stored.error_detail.clone(),
        }
    }
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TransferEvent);
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: TransferEvent) {}
}

/// In-process subscribers via `tokio::sync::broadcast`
///
/// Slow subscribers lag and lose the oldest events; publishing with no
/// subscriber is not an error.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<TransferEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: TransferEvent) {
        let _ = self.tx.send(event);
    }
}

/// Bounded lock-free queue drained by a consumer task
///
/// When full, the event is dropped and a warning logged.
pub struct QueuePublisher {
    queue: Arc<ArrayQueue<TransferEvent>>,
}

impl QueuePublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    pub fn queue(&self) -> Arc<ArrayQueue<TransferEvent>> {
        self.queue.clone()
    }

    pub fn drain(&self) -> Vec<TransferEvent> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }
}

impl EventPublisher for QueuePublisher {
    fn publish(&self, event: TransferEvent) {
        if let Err(dropped) = self.queue.push(event) {
            tracing::warn!(
                process_id = %dropped.process_id,
                new_state = %dropped.new_state,
                "Event queue full - dropping transfer event"
            );
        }
    }
}

/// Publishes to several sinks in order
#[derive(Default)]
pub struct FanoutPublisher {
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventPublisher>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, event: TransferEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}
