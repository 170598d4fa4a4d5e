//! Transfer Process State Definitions
//!
//! State IDs are stored as INTEGER in PostgreSQL. Gaps between IDs leave room
//! for intermediate states without renumbering persisted rows.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer process FSM states
///
/// ```text
/// INITIAL → REQUESTING → REQUESTED → STARTING → STARTED → COMPLETING → COMPLETED
///    ↓ (provider) ↗                               ↕                         ↓
///                                    SUSPENDING → SUSPENDED → RESUMING   DEPROVISIONING → DEPROVISIONED
///
/// any non-terminal ──→ TERMINATING → TERMINATED → DEPROVISIONING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum TransferProcessState {
    /// Created by a control request or an inbound protocol request
    Initial = 100,
    /// Consumer is sending the transfer request to the provider
    Requesting = 400,
    /// Request delivered (consumer) or received and validated (provider)
    Requested = 500,
    /// Data flow is being started
    Starting = 550,
    /// Data flow running. Resting state.
    Started = 600,
    Suspending = 650,
    /// Resting state
    Suspended = 700,
    Resuming = 720,
    Completing = 750,
    /// Terminal (for the control plane). Resting state.
    Completed = 800,
    Terminating = 825,
    /// Terminal (for the control plane). Resting state.
    Terminated = 850,
    Deprovisioning = 900,
    /// Final. Resting state.
    Deprovisioned = 1000,
}

impl TransferProcessState {
    pub const ALL: [TransferProcessState; 14] = [
        TransferProcessState::Initial,
        TransferProcessState::Requesting,
        TransferProcessState::Requested,
        TransferProcessState::Starting,
        TransferProcessState::Started,
        TransferProcessState::Suspending,
        TransferProcessState::Suspended,
        TransferProcessState::Resuming,
        TransferProcessState::Completing,
        TransferProcessState::Completed,
        TransferProcessState::Terminating,
        TransferProcessState::Terminated,
        TransferProcessState::Deprovisioning,
        TransferProcessState::Deprovisioned,
    ];

    /// Terminal from the control plane's point of view: no further
    /// terminate / suspend / resume requests are accepted.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferProcessState::Completed
                | TransferProcessState::Terminated
                | TransferProcessState::Deprovisioning
                | TransferProcessState::Deprovisioned
        )
    }

    /// Resting states have no entry action of their own. They are dispatched
    /// only while a request or inbound message is pending.
    #[inline]
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            TransferProcessState::Started
                | TransferProcessState::Suspended
                | TransferProcessState::Completed
                | TransferProcessState::Terminated
                | TransferProcessState::Deprovisioned
        )
    }

    /// States that can still be pre-empted by termination
    #[inline]
    pub fn accepts_termination(&self) -> bool {
        !self.is_terminal() && *self != TransferProcessState::Terminating
    }

    /// Allowed next states (the transition table)
    pub fn successors(&self) -> &'static [TransferProcessState] {
        use TransferProcessState::*;
        match self {
            Initial => &[Requesting, Requested, Terminating],
            Requesting => &[Requested, Terminating],
            Requested => &[Starting, Terminating],
            Starting => &[Started, Terminating],
            Started => &[Suspending, Completing, Terminating],
            Suspending => &[Suspended, Terminating],
            Suspended => &[Resuming, Terminating],
            Resuming => &[Started, Terminating],
            Completing => &[Completed, Terminating],
            Completed => &[Deprovisioning],
            Terminating => &[Terminated],
            Terminated => &[Deprovisioning],
            Deprovisioning => &[Deprovisioned],
            Deprovisioned => &[],
        }
    }

    #[inline]
    pub fn can_transition_to(&self, next: TransferProcessState) -> bool {
        self.successors().contains(&next)
    }

    /// Where a fatal error or exhausted retries lead from this state
    ///
    /// `None` for resting terminal states, which have no failing action.
    pub fn failure_target(&self) -> Option<TransferProcessState> {
        match self {
            TransferProcessState::Terminating => Some(TransferProcessState::Terminated),
            TransferProcessState::Deprovisioning => Some(TransferProcessState::Deprovisioned),
            s if s.accepts_termination() => Some(TransferProcessState::Terminating),
            _ => None,
        }
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i32 {
        *self as i32
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferProcessState::Initial => "INITIAL",
            TransferProcessState::Requesting => "REQUESTING",
            TransferProcessState::Requested => "REQUESTED",
            TransferProcessState::Starting => "STARTING",
            TransferProcessState::Started => "STARTED",
            TransferProcessState::Suspending => "SUSPENDING",
            TransferProcessState::Suspended => "SUSPENDED",
            TransferProcessState::Resuming => "RESUMING",
            TransferProcessState::Completing => "COMPLETING",
            TransferProcessState::Completed => "COMPLETED",
            TransferProcessState::Terminating => "TERMINATING",
            TransferProcessState::Terminated => "TERMINATED",
            TransferProcessState::Deprovisioning => "DEPROVISIONING",
            TransferProcessState::Deprovisioned => "DEPROVISIONED",
        }
    }

    /// Parse a state name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        Self::ALL.iter().copied().find(|s| s.as_str() == upper)
    }
}

impl fmt::Display for TransferProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i32> for TransferProcessState {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        TransferProcessState::from_id(value).ok_or(())
    }
}
