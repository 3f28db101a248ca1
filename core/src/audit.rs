//! Append-only audit trail.
//!
//! One [`AuditRecord`] is written per invocation attempt. Records are never
//! updated, except that a clinician review may be attached once afterwards.
//! Escalations are stored next to the records, keyed by their deterministic id.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::capability::UrgencyLevel;
use crate::error::AuditError;
use crate::escalation::{EscalationRecord, EscalationStatus};

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

/// Context keys treated as direct identifiers and stripped before digesting.
pub const DEFAULT_IDENTIFIER_FIELDS: [&str; 10] = [
    "name",
    "full_name",
    "patient_name",
    "email",
    "phone",
    "ssn",
    "address",
    "dob",
    "date_of_birth",
    "mrn",
];

/// Outcome category of one invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Completed,
    ClassificationFailure,
    ValidationFailure,
    AgentExecutionFailure,
    TimedOut,
    SafetyViolation,
    /// Emergency request that reached no capability output
    EmergencyEscalation,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ClassificationFailure => "classification_failure",
            Self::ValidationFailure => "validation_failure",
            Self::AgentExecutionFailure => "agent_execution_failure",
            Self::TimedOut => "timed_out",
            Self::SafetyViolation => "safety_violation",
            Self::EmergencyEscalation => "emergency_escalation",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "completed" => Self::Completed,
            "classification_failure" => Self::ClassificationFailure,
            "validation_failure" => Self::ValidationFailure,
            "agent_execution_failure" => Self::AgentExecutionFailure,
            "timed_out" => Self::TimedOut,
            "safety_violation" => Self::SafetyViolation,
            "emergency_escalation" => Self::EmergencyEscalation,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    NotRequired,
    Pending,
    Reviewed,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_required" => Some(Self::NotRequired),
            "pending" => Some(Self::Pending),
            "reviewed" => Some(Self::Reviewed),
            _ => None,
        }
    }
}

/// Clinician review attached to a record after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReviewInfo {
    /// Digest of the reviewer id
    pub reviewer_digest: String,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
    /// The reviewer overrode the capability's output
    pub overridden: bool,
    pub override_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub kind: AuditKind,
    /// Truncated SHA-256 of the caller's user id
    pub user_digest: String,
    pub urgency: UrgencyLevel,
    pub pre_confidence: f64,
    pub post_confidence: f64,
    pub escalation_id: Option<String>,
    /// Digest of the request after identifier redaction
    pub input_digest: String,
    /// Digest of the wrapped output after identifier redaction
    pub output_digest: String,
    /// Paths of the fields removed before digesting
    pub redacted_fields: Vec<String>,
    pub detail: Option<String>,
    pub review_status: ReviewStatus,
    pub review: Option<ReviewInfo>,
}

impl AuditRecord {
    pub fn is_escalated(&self) -> bool {
        self.escalation_id.is_some()
    }
}

/// Filters for [`AuditStore::list`]. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AuditFilter {
    pub agent_name: Option<String>,
    /// Lower bound on post-wrapper confidence
    pub min_confidence: Option<f64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Only records with (true) or without (false) an escalation
    pub escalated: Option<bool>,
    pub kind: Option<AuditKind>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_agent(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: Some(agent_name.into()),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.agent_name
            .as_deref()
            .is_none_or(|name| record.agent_name == name)
            && self
                .min_confidence
                .is_none_or(|min| record.post_confidence >= min)
            && self.since.is_none_or(|since| record.timestamp >= since)
            && self.until.is_none_or(|until| record.timestamp <= until)
            && self
                .escalated
                .is_none_or(|escalated| record.is_escalated() == escalated)
            && self.kind.is_none_or(|kind| record.kind == kind)
    }
}

/// Redaction result: the cleaned value plus the dotted paths that were removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Redacted {
    pub value: Value,
    pub removed: Vec<String>,
}

/// Strips direct-identifier keys from JSON, at any depth, case-insensitively.
#[derive(Debug, Clone)]
pub struct Redactor {
    fields: BTreeSet<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl Redactor {
    pub fn new<I, S>(extra_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = DEFAULT_IDENTIFIER_FIELDS
            .iter()
            .map(|f| f.to_string())
            .chain(
                extra_fields
                    .into_iter()
                    .map(|f| f.as_ref().trim().to_lowercase())
                    .filter(|f| !f.is_empty()),
            )
            .collect();
        Self { fields }
    }

    pub fn is_identifier(&self, key: &str) -> bool {
        self.fields.contains(&key.to_lowercase())
    }

    pub fn redact(&self, value: &Value) -> Redacted {
        let mut removed = Vec::new();
        let value = self.redact_at(value, "", &mut removed);
        Redacted { value, removed }
    }

    fn redact_at(&self, value: &Value, path: &str, removed: &mut Vec<String>) -> Value {
        let child_path = |key: &str| {
            if path.is_empty() {
                key.to_string()
            } else {
                format!("{path}.{key}")
            }
        };
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, child) in map {
                    if self.is_identifier(key) {
                        removed.push(child_path(key));
                    } else {
                        out.insert(key.clone(), self.redact_at(child, &child_path(key), removed));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.redact_at(item, &child_path(&i.to_string()), removed))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

pub fn digest_json(value: &Value) -> String {
    hex::encode(Sha256::digest(value.to_string().as_bytes()))
}

/// 16 hex chars of SHA-256. Stable for a given id, never reversible.
pub fn hash_user_id(user_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(user_id.trim().as_bytes()));
    digest[..16].to_string()
}

/// Aggregates over every record of one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentStatistics {
    pub agent_name: String,
    pub total_invocations: u64,
    pub completed: u64,
    pub escalations: u64,
    pub failures: u64,
    pub timed_out: u64,
    pub safety_violations: u64,
    pub reviewed: u64,
    pub overrides: u64,
    /// Mean post-wrapper confidence
    pub average_confidence: f64,
    /// Overrides per reviewed record
    pub override_rate: f64,
}

impl AgentStatistics {
    pub fn from_records<'a>(
        agent_name: &str,
        records: impl IntoIterator<Item = &'a AuditRecord>,
    ) -> Self {
        let mut stats = Self {
            agent_name: agent_name.to_string(),
            total_invocations: 0,
            completed: 0,
            escalations: 0,
            failures: 0,
            timed_out: 0,
            safety_violations: 0,
            reviewed: 0,
            overrides: 0,
            average_confidence: 0.0,
            override_rate: 0.0,
        };
        let mut confidence_sum = 0.0;
        for record in records.into_iter().filter(|r| r.agent_name == agent_name) {
            stats.total_invocations += 1;
            confidence_sum += record.post_confidence;
            match record.kind {
                AuditKind::Completed => stats.completed += 1,
                AuditKind::AgentExecutionFailure => stats.failures += 1,
                AuditKind::TimedOut => stats.timed_out += 1,
                AuditKind::SafetyViolation => stats.safety_violations += 1,
                _ => {}
            }
            if record.is_escalated() {
                stats.escalations += 1;
            }
            if let Some(review) = &record.review {
                stats.reviewed += 1;
                if review.overridden {
                    stats.overrides += 1;
                }
            }
        }
        if stats.total_invocations > 0 {
            stats.average_confidence = confidence_sum / stats.total_invocations as f64;
        }
        if stats.reviewed > 0 {
            stats.override_rate = stats.overrides as f64 / stats.reviewed as f64;
        }
        stats
    }
}

/// Persistence for audit records and escalations.
///
/// Implementations must be safe under concurrent writers. `append` must not
/// return until the record is durable.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;

    async fn get(&self, id: Uuid) -> Result<AuditRecord, AuditError>;

    /// Newest first, bounded by the filter's limit.
    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Attach a review. Fails with `Conflict` if the record was already reviewed.
    async fn set_review(&self, id: Uuid, review: ReviewInfo) -> Result<AuditRecord, AuditError>;

    /// Store one request's escalations and records together: either all of them
    /// are written or none are. Escalations whose id already exists are skipped;
    /// the ids of the newly inserted ones are returned.
    async fn append_batch(
        &self,
        records: Vec<AuditRecord>,
        escalations: Vec<EscalationRecord>,
    ) -> Result<Vec<String>, AuditError>;

    /// Insert an escalation. Returns false when one with the same id exists.
    async fn record_escalation(&self, escalation: EscalationRecord) -> Result<bool, AuditError>;

    async fn list_escalations(
        &self,
        pending_only: bool,
    ) -> Result<Vec<EscalationRecord>, AuditError>;

    async fn agent_statistics(&self, agent_name: &str) -> Result<AgentStatistics, AuditError>;

    async fn ping(&self) -> Result<(), AuditError>;

    fn backend(&self) -> &'static str;
}

/// In-process store used by tests and by the service when no database is configured.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
    escalations: RwLock<BTreeMap<String, EscalationRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(AuditError::Conflict(record.id.to_string()));
        }
        records.push(record);
        Ok(())
    }

    async fn append_batch(
        &self,
        records: Vec<AuditRecord>,
        escalations: Vec<EscalationRecord>,
    ) -> Result<Vec<String>, AuditError> {
        let mut stored_records = self.records.write().await;
        let mut stored_escalations = self.escalations.write().await;

        let mut seen = BTreeSet::new();
        for record in &records {
            if !seen.insert(record.id) || stored_records.iter().any(|r| r.id == record.id) {
                return Err(AuditError::Conflict(record.id.to_string()));
            }
        }

        let mut inserted = Vec::new();
        for escalation in escalations {
            if !stored_escalations.contains_key(&escalation.id) {
                inserted.push(escalation.id.clone());
                stored_escalations.insert(escalation.id.clone(), escalation);
            }
        }
        stored_records.extend(records);
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AuditError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().await;
        let mut matched: Vec<AuditRecord> =
            records.iter().filter(|r| filter.matches(r)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        matched.truncate(filter.effective_limit());
        Ok(matched)
    }

    async fn set_review(&self, id: Uuid, review: ReviewInfo) -> Result<AuditRecord, AuditError> {
        let updated = {
            let mut records = self.records.write().await;
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| AuditError::NotFound(id.to_string()))?;
            if record.review.is_some() {
                return Err(AuditError::Conflict(id.to_string()));
            }
            record.review = Some(review);
            record.review_status = ReviewStatus::Reviewed;
            record.clone()
        };

        if let Some(escalation_id) = &updated.escalation_id {
            if let Some(escalation) = self.escalations.write().await.get_mut(escalation_id) {
                escalation.status = EscalationStatus::Reviewed;
            }
        }
        Ok(updated)
    }

    async fn record_escalation(&self, escalation: EscalationRecord) -> Result<bool, AuditError> {
        let mut escalations = self.escalations.write().await;
        if escalations.contains_key(&escalation.id) {
            return Ok(false);
        }
        escalations.insert(escalation.id.clone(), escalation);
        Ok(true)
    }

    async fn list_escalations(
        &self,
        pending_only: bool,
    ) -> Result<Vec<EscalationRecord>, AuditError> {
        let mut out: Vec<EscalationRecord> = self
            .escalations
            .read()
            .await
            .values()
            .filter(|e| !pending_only || e.status == EscalationStatus::PendingReview)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn agent_statistics(&self, agent_name: &str) -> Result<AgentStatistics, AuditError> {
        let records = self.records.read().await;
        Ok(AgentStatistics::from_records(agent_name, records.iter()))
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::escalation::{EscalationTicket, escalation_id};

    fn record(agent: &str, kind: AuditKind, confidence: f64, escalated: bool) -> AuditRecord {
        let request_id = Uuid::now_v7();
        AuditRecord {
            id: Uuid::now_v7(),
            request_id,
            timestamp: Utc::now(),
            agent_name: agent.to_string(),
            kind,
            user_digest: hash_user_id("patient-1"),
            urgency: UrgencyLevel::Routine,
            pre_confidence: confidence,
            post_confidence: confidence,
            escalation_id: escalated.then(|| escalation_id(request_id, agent)),
            input_digest: digest_json(&json!({})),
            output_digest: digest_json(&json!({})),
            redacted_fields: Vec::new(),
            detail: None,
            review_status: if escalated {
                ReviewStatus::Pending
            } else {
                ReviewStatus::NotRequired
            },
            review: None,
        }
    }

    fn review(overridden: bool) -> ReviewInfo {
        ReviewInfo {
            reviewer_digest: hash_user_id("dr-house"),
            reviewed_at: Utc::now(),
            notes: Some("checked".to_string()),
            overridden,
            override_reason: overridden.then(|| "missed interaction".to_string()),
        }
    }

    #[test]
    fn redactor_strips_identifiers_at_any_depth() {
        let redactor = Redactor::new(["Insurance_ID"]);
        let redacted = redactor.redact(&json!({
            "context": {
                "Email": "a@b.c",
                "age": 40,
                "insurance_id": "X-1",
                "contacts": [{ "phone": "555", "relation": "sister" }]
            },
            "text": "hello"
        }));

        assert_eq!(
            redacted.value,
            json!({
                "context": { "age": 40, "contacts": [{ "relation": "sister" }] },
                "text": "hello"
            })
        );
        assert_eq!(
            redacted.removed,
            vec!["context.Email", "context.contacts.0.phone", "context.insurance_id"]
        );
    }

    #[test]
    fn redaction_and_digests_are_deterministic() {
        let redactor = Redactor::default();
        let input = json!({ "name": "Jane", "symptom": "cough" });
        let a = redactor.redact(&input);
        let b = redactor.redact(&input);
        assert_eq!(digest_json(&a.value), digest_json(&b.value));
        assert_eq!(digest_json(&a.value), digest_json(&json!({ "symptom": "cough" })));
    }

    #[test]
    fn user_id_hash_is_short_and_stable() {
        let digest = hash_user_id("patient-42");
        assert_eq!(digest.len(), 16);
        assert_eq!(digest, hash_user_id(" patient-42 "));
        assert_ne!(digest, hash_user_id("patient-43"));
    }

    #[test]
    fn filter_limit_is_clamped() {
        assert_eq!(AuditFilter::default().effective_limit(), DEFAULT_LIST_LIMIT);
        let big = AuditFilter {
            limit: Some(10_000),
            ..AuditFilter::default()
        };
        assert_eq!(big.effective_limit(), MAX_LIST_LIMIT);
        let zero = AuditFilter {
            limit: Some(0),
            ..AuditFilter::default()
        };
        assert_eq!(zero.effective_limit(), 1);
    }

    #[tokio::test]
    async fn list_applies_every_filter() {
        let store = MemoryAuditStore::new();
        let mut old = record("drug_info", AuditKind::Completed, 0.9, false);
        old.timestamp = Utc::now() - Duration::hours(2);
        store.append(old.clone()).await.unwrap();
        store
            .append(record("drug_info", AuditKind::Completed, 0.4, false))
            .await
            .unwrap();
        store
            .append(record("triage", AuditKind::Completed, 1.0, true))
            .await
            .unwrap();
        store
            .append(record("triage", AuditKind::TimedOut, 0.0, false))
            .await
            .unwrap();

        let drug = store.list(&AuditFilter::for_agent("drug_info")).await.unwrap();
        assert_eq!(drug.len(), 2);

        let confident = AuditFilter {
            min_confidence: Some(0.8),
            ..AuditFilter::default()
        };
        assert_eq!(store.list(&confident).await.unwrap().len(), 2);

        let recent = AuditFilter {
            since: Some(Utc::now() - Duration::hours(1)),
            ..AuditFilter::default()
        };
        assert!(store.list(&recent).await.unwrap().iter().all(|r| r.id != old.id));

        let escalated = AuditFilter {
            escalated: Some(true),
            ..AuditFilter::default()
        };
        let hits = store.list(&escalated).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].agent_name, "triage");

        let timed_out = AuditFilter {
            kind: Some(AuditKind::TimedOut),
            ..AuditFilter::default()
        };
        assert_eq!(store.list(&timed_out).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_are_append_only() {
        let store = MemoryAuditStore::new();
        let rec = record("triage", AuditKind::Completed, 0.7, false);
        store.append(rec.clone()).await.unwrap();
        assert!(matches!(
            store.append(rec.clone()).await,
            Err(AuditError::Conflict(_))
        ));
        assert!(matches!(
            store.get(Uuid::now_v7()).await,
            Err(AuditError::NotFound(_))
        ));
        assert_eq!(store.get(rec.id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn batch_with_a_conflicting_record_writes_nothing() {
        let store = MemoryAuditStore::new();
        let existing = record("triage", AuditKind::Completed, 0.7, false);
        store.append(existing.clone()).await.unwrap();

        let escalated = record("triage", AuditKind::Completed, 1.0, true);
        let escalation = EscalationRecord {
            id: escalated.escalation_id.clone().unwrap(),
            request_id: escalated.request_id,
            capability: "triage".to_string(),
            reasons: vec![crate::escalation::EscalationReason::RedFlags],
            red_flags: vec!["chest pain".to_string()],
            status: EscalationStatus::PendingReview,
            created_at: Utc::now(),
        };
        let result = store
            .append_batch(vec![escalated.clone(), existing], vec![escalation.clone()])
            .await;

        assert!(matches!(result, Err(AuditError::Conflict(_))));
        assert_eq!(store.len().await, 1);
        assert!(store.get(escalated.id).await.is_err());
        assert!(store.list_escalations(false).await.unwrap().is_empty());

        let inserted = store
            .append_batch(vec![escalated], vec![escalation.clone(), escalation])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn review_is_set_once_and_closes_the_escalation() {
        let store = MemoryAuditStore::new();
        let rec = record("triage", AuditKind::Completed, 1.0, true);
        let ticket = EscalationTicket {
            id: rec.escalation_id.clone().unwrap(),
            request_id: rec.request_id,
            capability: "triage".to_string(),
            reasons: vec![crate::escalation::EscalationReason::EmergencyUrgency],
            red_flags: Vec::new(),
        };
        assert!(
            store
                .record_escalation(EscalationRecord::from_ticket(&ticket, Utc::now()))
                .await
                .unwrap()
        );
        assert!(
            !store
                .record_escalation(EscalationRecord::from_ticket(&ticket, Utc::now()))
                .await
                .unwrap()
        );
        store.append(rec.clone()).await.unwrap();

        let reviewed = store.set_review(rec.id, review(false)).await.unwrap();
        assert_eq!(reviewed.review_status, ReviewStatus::Reviewed);
        assert!(matches!(
            store.set_review(rec.id, review(true)).await,
            Err(AuditError::Conflict(_))
        ));
        assert!(store.list_escalations(true).await.unwrap().is_empty());
        assert_eq!(store.list_escalations(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn statistics_count_outcomes_and_overrides() {
        let store = MemoryAuditStore::new();
        let reviewed_ok = record("drug_info", AuditKind::Completed, 0.8, true);
        let reviewed_override = record("drug_info", AuditKind::Completed, 0.6, false);
        for rec in [
            reviewed_ok.clone(),
            reviewed_override.clone(),
            record("drug_info", AuditKind::AgentExecutionFailure, 0.0, false),
            record("drug_info", AuditKind::TimedOut, 0.0, false),
            record("triage", AuditKind::Completed, 1.0, true),
        ] {
            store.append(rec).await.unwrap();
        }
        store.set_review(reviewed_ok.id, review(false)).await.unwrap();
        store.set_review(reviewed_override.id, review(true)).await.unwrap();

        let stats = store.agent_statistics("drug_info").await.unwrap();
        assert_eq!(stats.total_invocations, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.escalations, 1);
        assert_eq!(stats.reviewed, 2);
        assert_eq!(stats.overrides, 1);
        assert!((stats.average_confidence - 0.35).abs() < 1e-9);
        assert!((stats.override_rate - 0.5).abs() < 1e-9);

        let empty = store.agent_statistics("voice").await.unwrap();
        assert_eq!(empty.total_invocations, 0);
        assert_eq!(empty.average_confidence, 0.0);
    }

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in [
            AuditKind::Completed,
            AuditKind::ClassificationFailure,
            AuditKind::ValidationFailure,
            AuditKind::AgentExecutionFailure,
            AuditKind::TimedOut,
            AuditKind::SafetyViolation,
            AuditKind::EmergencyEscalation,
        ] {
            assert_eq!(AuditKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AuditKind::parse("bogus"), None);
    }
}
