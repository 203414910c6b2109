//! Shared domain and wire types for the power-management transition engine.
//!
//! Every other crate in the workspace depends on this one for the entities
//! and state machines in play; nothing here talks to a database, the
//! network, or a clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod envelope;
pub mod state;

pub use envelope::EventEnvelope;
pub use state::{
    TaskLifecycleEvent, TaskPhase, TaskStateError, TransitionLifecycleEvent, TransitionPhase,
    TransitionStateError,
};

/// One of the six Redfish reset verbs a transition can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Operation {
    On,
    ForceOff,
    GracefulShutdown,
    GracefulRestart,
    ForceRestart,
    Nmi,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::On => "On",
            Operation::ForceOff => "ForceOff",
            Operation::GracefulShutdown => "GracefulShutdown",
            Operation::GracefulRestart => "GracefulRestart",
            Operation::ForceRestart => "ForceRestart",
            Operation::Nmi => "Nmi",
        }
    }

    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "On" => Some(Operation::On),
            "ForceOff" => Some(Operation::ForceOff),
            "GracefulShutdown" => Some(Operation::GracefulShutdown),
            "GracefulRestart" => Some(Operation::GracefulRestart),
            "ForceRestart" => Some(Operation::ForceRestart),
            "Nmi" | "NMI" => Some(Operation::Nmi),
            _ => None,
        }
    }

    /// Expected terminal power state once the operation succeeds, or `None`
    /// for an operation verification does not cover.
    pub fn expected_power_state(&self) -> Option<ExpectedPowerState> {
        match self {
            Operation::On | Operation::GracefulRestart | Operation::ForceRestart | Operation::Nmi => {
                Some(ExpectedPowerState::On)
            }
            Operation::ForceOff | Operation::GracefulShutdown => Some(ExpectedPowerState::Off),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedPowerState {
    On,
    Off,
}

impl ExpectedPowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedPowerState::On => "On",
            ExpectedPowerState::Off => "Off",
        }
    }

    /// Case-insensitive match against a raw power state string returned by a reader.
    pub fn matches_observed(&self, observed: &str) -> bool {
        observed.eq_ignore_ascii_case(self.as_str())
    }
}

/// Identity of one BMC. Owned exclusively by the topology syncer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BMCEndpoint {
    pub bmc_id: String,
    pub endpoint: String,
    pub credential_id: String,
    pub insecure_skip_verify: bool,
    pub source: String,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Node to BMC binding. Owned exclusively by the topology syncer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBMCLink {
    pub node_id: String,
    pub bmc_id: String,
    pub source: String,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fully resolved node -> BMC mapping, as returned to the Engine at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePowerMapping {
    pub node_id: String,
    pub bmc_id: String,
    pub endpoint: String,
    pub credential_id: String,
    pub insecure_skip_verify: bool,
}

/// A node requested in a transition whose mapping could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingMapping {
    pub node_id: String,
    pub code: MappingErrorCode,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingErrorCode {
    NotFound,
    EndpointMissing,
    CredentialMissing,
}

impl MappingErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingErrorCode::NotFound => "not_found",
            MappingErrorCode::EndpointMissing => "endpoint_missing",
            MappingErrorCode::CredentialMissing => "credential_missing",
        }
    }
}

/// One user-submitted batch plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    pub request_id: Option<String>,
    pub operation: Operation,
    pub state: TransitionPhase,
    pub requested_by: String,
    pub dry_run: bool,
    pub target_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transition {
    /// `success_count + failure_count <= target_count`, checked at every
    /// call site that mutates either counter.
    pub fn counts_within_target(&self) -> bool {
        self.success_count + self.failure_count <= self.target_count
    }
}

/// One node's slice of a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub transition_id: Uuid,
    pub node_id: String,
    pub bmc_id: String,
    pub bmc_endpoint: String,
    pub credential_id: String,
    pub insecure_skip_verify: bool,
    pub operation: Operation,
    pub state: TaskPhase,
    pub dry_run: bool,
    pub attempt_count: i64,
    pub final_power_state: Option<String>,
    pub error_detail: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable record backing at-least-once publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: String,
    pub event_type: String,
    pub subject: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Generates an outbox event id in the `"evt-" + 16 random bytes (hex)` shape.
pub fn new_outbox_event_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut s = String::with_capacity(4 + bytes.len() * 2);
    s.push_str("evt-");
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

