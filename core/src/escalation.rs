//! Escalation protocol: the transition from "response produced" to "flagged for
//! mandatory human review".
//!
//! Escalation ids are derived from `(request_id, capability)`, so raising the
//! same escalation twice yields the same id and stores can deduplicate on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::capability::UrgencyLevel;

/// Capability name used for escalations raised by the orchestrator itself.
pub const REQUEST_LEVEL_CAPABILITY: &str = "orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    EmergencyUrgency,
    RedFlags,
    SafetyViolation,
    /// Emergency request that no capability produced a response for
    UnhandledEmergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    PendingReview,
    Reviewed,
}

impl EscalationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Reviewed => "reviewed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending_review" => Some(Self::PendingReview),
            "reviewed" => Some(Self::Reviewed),
            _ => None,
        }
    }
}

/// Escalation decision attached to a wrapped response. Pure data: identical
/// inputs always produce an identical ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EscalationTicket {
    pub id: String,
    pub request_id: Uuid,
    pub capability: String,
    pub reasons: Vec<EscalationReason>,
    pub red_flags: Vec<String>,
}

/// Persisted escalation, recorded distinctly from audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EscalationRecord {
    pub id: String,
    pub request_id: Uuid,
    pub capability: String,
    pub reasons: Vec<EscalationReason>,
    pub red_flags: Vec<String>,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn from_ticket(ticket: &EscalationTicket, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ticket.id.clone(),
            request_id: ticket.request_id,
            capability: ticket.capability.clone(),
            reasons: ticket.reasons.clone(),
            red_flags: ticket.red_flags.clone(),
            status: EscalationStatus::PendingReview,
            created_at,
        }
    }
}

pub fn escalation_id(request_id: Uuid, capability: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request_id.as_bytes());
    hasher.update(b":");
    hasher.update(capability.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("esc_{}", &digest[..24])
}

/// Decide whether a capability's output must be escalated. At most one ticket is
/// produced per `(request_id, capability)` no matter how many red flags fired.
pub fn evaluate(
    request_id: Uuid,
    capability: &str,
    urgency: UrgencyLevel,
    red_flags: &[String],
    safety_violation: bool,
) -> Option<EscalationTicket> {
    let mut reasons = Vec::new();
    if urgency == UrgencyLevel::Emergency {
        reasons.push(EscalationReason::EmergencyUrgency);
    }
    if !red_flags.is_empty() {
        reasons.push(EscalationReason::RedFlags);
    }
    if safety_violation {
        reasons.push(EscalationReason::SafetyViolation);
    }
    if reasons.is_empty() {
        return None;
    }

    Some(EscalationTicket {
        id: escalation_id(request_id, capability),
        request_id,
        capability: capability.to_string(),
        reasons,
        red_flags: red_flags.to_vec(),
    })
}

/// Ticket for an emergency request that reached no capability output.
pub fn unhandled_emergency(request_id: Uuid, cues: &[String]) -> EscalationTicket {
    EscalationTicket {
        id: escalation_id(request_id, REQUEST_LEVEL_CAPABILITY),
        request_id,
        capability: REQUEST_LEVEL_CAPABILITY.to_string(),
        reasons: vec![
            EscalationReason::EmergencyUrgency,
            EscalationReason::UnhandledEmergency,
        ],
        red_flags: cues.to_vec(),
    }
}
