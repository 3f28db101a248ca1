//! Request lifecycle: classify, validate, dispatch, wrap, persist, respond.
//!
//! Every capability selected for a request gets exactly one audit record, even
//! when it was never invoked (missing context) or never answered (timeout).
//! Records and escalations are written before [`Orchestrator::submit`] returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{
    AgentStatistics, AuditFilter, AuditKind, AuditRecord, AuditStore, Redactor, ReviewInfo,
    ReviewStatus, digest_json, hash_user_id,
};
use crate::capability::{AgentResponse, CapabilityCategory, ClinicalRequest, UrgencyLevel};
use crate::classifier::{ClassifierInput, IntentClassifier, IntentResult, KeywordClassifier};
use crate::config::OrchestratorConfig;
use crate::error::{ClassificationError, OrchestratorError};
use crate::escalation::{self, EscalationRecord, EscalationTicket, REQUEST_LEVEL_CAPABILITY};
use crate::registry::{AgentDescriptor, AgentRegistry, CapabilityInfo, RegisteredAgent};
use crate::safety::{
    ConfidenceTier, SafetyDecision, SafetyWrapper, WrappedResponse, disclaimer_for,
};

/// Agent name on audit records written for classification outcomes.
pub const CLASSIFIER_AGENT: &str = "intent_classifier";

pub const CLARIFICATION_PROMPT: &str = "I could not tell what you need help with. Please describe your symptoms, name the medication you are asking about, or attach the image or recording you want reviewed.";

pub const INPUT_TOO_LONG_PROMPT: &str = "Your message is too long to process. Please shorten it to the key symptoms or question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    /// The provider failed, panicked or declined the input
    Degraded,
    /// Required context was absent; the handler was not invoked
    MissingInformation,
    TimedOut,
    /// Output failed the hard safety check and was replaced
    Blocked,
}

/// One capability's contribution to the aggregated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CapabilityResult {
    pub capability: String,
    pub status: ResultStatus,
    pub data: Value,
    pub confidence: f64,
    pub confidence_tier: ConfidenceTier,
    pub reasoning: Option<String>,
    pub disclaimer: String,
    pub disclaimer_category: CapabilityCategory,
    pub red_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    pub escalation_id: Option<String>,
    pub audit_id: Uuid,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregatedResponse {
    pub request_id: Uuid,
    /// At least one capability completed
    pub success: bool,
    /// Primary capability, or "unclassified"
    pub primary_capability: String,
    pub urgency: UrgencyLevel,
    /// Classifier confidence
    pub confidence: f64,
    /// Set whenever any escalation was raised for this request
    pub emergency: bool,
    /// Escalated results first, then routing order
    pub results: Vec<CapabilityResult>,
    /// Audit record of the primary outcome
    pub audit_id: Uuid,
    pub escalations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
}

/// Review submitted by a clinician for one audit record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewSubmission {
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// The reviewer overrides the capability's output
    #[serde(rename = "override", default)]
    pub override_decision: bool,
    /// Required when `override` is true
    #[serde(default)]
    pub override_reason: Option<String>,
}

/// Operator-visible counters for the failure kinds that indicate a reliability problem.
#[derive(Debug, Default)]
pub struct ReliabilityCounters {
    requests: AtomicU64,
    escalations: AtomicU64,
    agent_execution_failures: AtomicU64,
    safety_violations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReliabilitySnapshot {
    pub requests: u64,
    pub escalations: u64,
    pub agent_execution_failures: u64,
    pub safety_violations: u64,
}

impl ReliabilityCounters {
    pub fn snapshot(&self) -> ReliabilitySnapshot {
        ReliabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            agent_execution_failures: self.agent_execution_failures.load(Ordering::Relaxed),
            safety_violations: self.safety_violations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrchestratorHealth {
    /// "ok", or "degraded" when the audit store is unreachable
    pub status: String,
    pub total_capabilities: usize,
    pub enabled_capabilities: usize,
    pub audit_backend: String,
    pub audit_reachable: bool,
    pub per_call_timeout_ms: u64,
    pub request_deadline_ms: u64,
    pub counters: ReliabilitySnapshot,
}

enum CallOutcome {
    Completed(AgentResponse),
    Failed(String),
    TimedOut,
}

enum Planned {
    Dispatch(RegisteredAgent),
    MissingInformation(Arc<AgentDescriptor>, Vec<String>),
    /// Named by the classifier but absent from the registry
    Unregistered(Arc<AgentDescriptor>),
}

/// Per-request facts shared by every audit record of that request.
struct RequestTrace {
    request_id: Uuid,
    user_digest: String,
    input_digest: String,
    redacted_fields: Vec<String>,
    urgency: UrgencyLevel,
}

struct Assembled {
    result: CapabilityResult,
    record: AuditRecord,
    ticket: Option<EscalationTicket>,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    safety: SafetyWrapper,
    audit: Arc<dyn AuditStore>,
    redactor: Redactor,
    config: OrchestratorConfig,
    counters: ReliabilityCounters,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        audit: Arc<dyn AuditStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let classifier = Arc::new(KeywordClassifier::new(config.emergency_capability.clone()));
        Self {
            registry,
            classifier,
            safety: SafetyWrapper::new(),
            audit,
            redactor: Redactor::new(&config.identifier_fields),
            config,
            counters: ReliabilityCounters::default(),
        }
    }

    /// Swap in another classifier. It must honour the `IntentResult` contract.
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn counters(&self) -> ReliabilitySnapshot {
        self.counters.snapshot()
    }

    pub async fn submit(
        &self,
        request: ClinicalRequest,
    ) -> Result<AggregatedResponse, OrchestratorError> {
        let started = Instant::now();
        let request_id = Uuid::now_v7();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let redacted_input = self.redactor.redact(&json!({
            "text": request.text,
            "attachments": request.attachments,
            "context": request.context,
        }));
        let mut trace = RequestTrace {
            request_id,
            user_digest: hash_user_id(&request.user_id),
            input_digest: digest_json(&redacted_input.value),
            redacted_fields: redacted_input.removed,
            urgency: UrgencyLevel::Routine,
        };

        let input = ClassifierInput::from_request(&request);
        let catalog = self.registry.list_all();
        let intent = match self.classifier.classify(&input, &catalog) {
            Ok(intent) => intent,
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "Classification failed");
                let prompt = match &err {
                    ClassificationError::InputTooLong { .. } => INPUT_TOO_LONG_PROMPT,
                    ClassificationError::Internal(_) => CLARIFICATION_PROMPT,
                };
                return self
                    .respond_unclassified(&trace, IntentResult::unclassified(err.to_string()), prompt)
                    .await;
            }
        };
        trace.urgency = intent.urgency;

        if intent.is_unclassified() && intent.urgency != UrgencyLevel::Emergency {
            return self
                .respond_unclassified(&trace, intent, CLARIFICATION_PROMPT)
                .await;
        }

        let plans = self.plan(&request, &intent);
        let to_dispatch: Vec<(usize, RegisteredAgent)> = plans
            .iter()
            .enumerate()
            .filter_map(|(slot, plan)| match plan {
                Planned::Dispatch(agent) => Some((slot, agent.clone())),
                _ => None,
            })
            .collect();
        let mut outcomes = self.dispatch(Arc::new(request), to_dispatch, plans.len()).await;

        let mut assembled: Vec<Assembled> = plans
            .iter()
            .enumerate()
            .map(|(slot, plan)| match plan {
                Planned::Dispatch(agent) => {
                    let outcome = outcomes[slot].take().unwrap_or(CallOutcome::TimedOut);
                    self.assemble_dispatched(&trace, &agent.descriptor, outcome)
                }
                Planned::MissingInformation(descriptor, missing) => {
                    self.assemble_missing(&trace, descriptor, missing)
                }
                Planned::Unregistered(descriptor) => self.assemble_dispatched(
                    &trace,
                    descriptor,
                    CallOutcome::Failed(format!("capability '{}' is not registered", descriptor.name)),
                ),
            })
            .collect();

        if intent.urgency == UrgencyLevel::Emergency && assembled.iter().all(|a| a.ticket.is_none())
        {
            assembled.push(self.assemble_unhandled_emergency(&trace, &intent));
        }

        // Escalated results surface first; the sort is stable so routing order holds otherwise.
        assembled.sort_by_key(|a| a.ticket.is_none());

        self.persist(&assembled).await?;

        let escalations: Vec<String> = assembled
            .iter()
            .filter_map(|a| a.ticket.as_ref().map(|t| t.id.clone()))
            .collect();
        let audit_id = assembled
            .iter()
            .find(|a| a.result.capability == intent.primary)
            .or_else(|| assembled.first())
            .map(|a| a.record.id)
            .unwrap_or(request_id);
        let results: Vec<CapabilityResult> = assembled.into_iter().map(|a| a.result).collect();

        let response = AggregatedResponse {
            request_id,
            success: results.iter().any(|r| r.status == ResultStatus::Completed),
            primary_capability: intent.primary.clone(),
            urgency: intent.urgency,
            confidence: intent.confidence,
            emergency: !escalations.is_empty(),
            results,
            audit_id,
            escalations,
            clarification: None,
        };

        tracing::info!(
            request_id = %request_id,
            primary = %response.primary_capability,
            urgency = response.urgency.as_str(),
            emergency = response.emergency,
            results = response.results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        Ok(response)
    }

    /// Resolve each routed capability to a dispatch, a missing-information short
    /// circuit, or an unregistered failure.
    fn plan(&self, request: &ClinicalRequest, intent: &IntentResult) -> Vec<Planned> {
        intent
            .routed_capabilities()
            .into_iter()
            .map(|name| match self.registry.lookup(&name) {
                Ok(agent) => {
                    let missing: Vec<String> = agent
                        .descriptor
                        .required_context
                        .iter()
                        .filter(|key| request.context_value(key).is_none())
                        .cloned()
                        .collect();
                    if missing.is_empty() {
                        Planned::Dispatch(agent)
                    } else {
                        Planned::MissingInformation(agent.descriptor.clone(), missing)
                    }
                }
                Err(err) => {
                    tracing::warn!(capability = %name, error = %err, "Classifier routed to an unknown capability");
                    Planned::Unregistered(Arc::new(AgentDescriptor::new(
                        name,
                        CapabilityCategory::General,
                    )))
                }
            })
            .collect()
    }

    /// Run every agent concurrently. Each call is bound by the per-call timeout and
    /// the whole set by the request deadline; slots still empty afterwards timed out.
    async fn dispatch(
        &self,
        request: Arc<ClinicalRequest>,
        agents: Vec<(usize, RegisteredAgent)>,
        slots: usize,
    ) -> Vec<Option<CallOutcome>> {
        let mut outcomes: Vec<Option<CallOutcome>> = (0..slots).map(|_| None).collect();
        if agents.is_empty() {
            return outcomes;
        }

        let deadline = Instant::now() + self.config.request_deadline;
        let per_call = self.config.per_call_timeout;
        let mut set = JoinSet::new();
        let mut slot_of: HashMap<task::Id, usize> = HashMap::new();

        for (slot, agent) in agents {
            let request = request.clone();
            let handler = agent.handler.clone();
            let handle = set.spawn(async move {
                match tokio::time::timeout(per_call, handler.process(&request)).await {
                    Ok(Ok(response)) => CallOutcome::Completed(response),
                    Ok(Err(err)) => CallOutcome::Failed(err.to_string()),
                    Err(_) => CallOutcome::TimedOut,
                }
            });
            slot_of.insert(handle.id(), slot);
        }

        loop {
            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    if let Some(&slot) = slot_of.get(&id) {
                        outcomes[slot] = Some(outcome);
                    }
                }
                Ok(Some(Err(join_err))) => {
                    if let Some(&slot) = slot_of.get(&join_err.id()) {
                        let message = if join_err.is_panic() {
                            "provider panicked".to_string()
                        } else {
                            "provider task was cancelled".to_string()
                        };
                        outcomes[slot] = Some(CallOutcome::Failed(message));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        outstanding = set.len(),
                        deadline_ms = self.config.request_deadline.as_millis() as u64,
                        "Request deadline elapsed; abandoning outstanding calls"
                    );
                    set.abort_all();
                    break;
                }
            }
        }
        outcomes
    }

    fn assemble_dispatched(
        &self,
        trace: &RequestTrace,
        descriptor: &AgentDescriptor,
        outcome: CallOutcome,
    ) -> Assembled {
        let (response, status, kind, detail) = match outcome {
            CallOutcome::Completed(response) => {
                let status = if response.success {
                    ResultStatus::Completed
                } else {
                    ResultStatus::Degraded
                };
                (response, status, AuditKind::Completed, None)
            }
            CallOutcome::Failed(message) => {
                self.counters
                    .agent_execution_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    request_id = %trace.request_id,
                    capability = %descriptor.name,
                    error = %message,
                    "Capability execution failed"
                );
                (
                    AgentResponse::degraded(message.clone()),
                    ResultStatus::Degraded,
                    AuditKind::AgentExecutionFailure,
                    Some(message),
                )
            }
            CallOutcome::TimedOut => {
                self.counters
                    .agent_execution_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    request_id = %trace.request_id,
                    capability = %descriptor.name,
                    "Capability timed out"
                );
                (
                    AgentResponse::degraded("capability did not respond before the deadline"),
                    ResultStatus::TimedOut,
                    AuditKind::TimedOut,
                    Some("timed out".to_string()),
                )
            }
        };

        let wrapped = self
            .safety
            .wrap(trace.request_id, descriptor, trace.urgency, &response);

        let (status, kind, detail) = match &wrapped.decision.violation {
            Some(rule) => {
                self.counters.safety_violations.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    request_id = %trace.request_id,
                    capability = %descriptor.name,
                    rule = %rule,
                    "Capability output blocked by safety check"
                );
                (
                    ResultStatus::Blocked,
                    AuditKind::SafetyViolation,
                    Some(format!("blocked by rule {rule}")),
                )
            }
            None => (status, kind, detail),
        };

        self.assemble(trace, wrapped, status, kind, detail, Vec::new())
    }

    fn assemble_missing(
        &self,
        trace: &RequestTrace,
        descriptor: &AgentDescriptor,
        missing: &[String],
    ) -> Assembled {
        tracing::debug!(
            request_id = %trace.request_id,
            capability = %descriptor.name,
            missing = ?missing,
            "Required context missing; handler not invoked"
        );
        let disclaimer_category = if trace.urgency == UrgencyLevel::Emergency {
            CapabilityCategory::Emergency
        } else {
            descriptor.category
        };
        let wrapped = WrappedResponse {
            capability: descriptor.name.clone(),
            success: false,
            data: json!({
                "message": format!("More information is needed: {}", missing.join(", ")),
                "missing_fields": missing,
            }),
            reasoning: None,
            red_flags: Vec::new(),
            pre_confidence: 0.0,
            confidence: 0.0,
            tier: ConfidenceTier::VeryLow,
            decision: SafetyDecision {
                disclaimer: disclaimer_for(disclaimer_category).to_string(),
                disclaimer_category,
                softened: false,
                blocked: false,
                rewrites: Vec::new(),
                review_note: None,
                violation: None,
                escalation: None,
            },
        };
        self.assemble(
            trace,
            wrapped,
            ResultStatus::MissingInformation,
            AuditKind::ValidationFailure,
            Some(format!("missing context: {}", missing.join(", "))),
            missing.to_vec(),
        )
    }

    fn assemble_unhandled_emergency(&self, trace: &RequestTrace, intent: &IntentResult) -> Assembled {
        let ticket = escalation::unhandled_emergency(trace.request_id, &intent.emergency_cues);
        tracing::warn!(
            request_id = %trace.request_id,
            escalation_id = %ticket.id,
            "Emergency request produced no capability escalation; raising request-level escalation"
        );
        let wrapped = WrappedResponse {
            capability: REQUEST_LEVEL_CAPABILITY.to_string(),
            success: false,
            data: json!({
                "message": "Your message may describe a medical emergency. A clinician has been alerted.",
                "emergency_cues": intent.emergency_cues,
            }),
            reasoning: Some(intent.reasoning.clone()),
            red_flags: intent.emergency_cues.clone(),
            pre_confidence: intent.confidence,
            confidence: intent.confidence,
            tier: ConfidenceTier::from_confidence(intent.confidence),
            decision: SafetyDecision {
                disclaimer: disclaimer_for(CapabilityCategory::Emergency).to_string(),
                disclaimer_category: CapabilityCategory::Emergency,
                softened: false,
                blocked: false,
                rewrites: Vec::new(),
                review_note: None,
                violation: None,
                escalation: Some(ticket),
            },
        };
        self.assemble(
            trace,
            wrapped,
            ResultStatus::Completed,
            AuditKind::EmergencyEscalation,
            Some(intent.reasoning.clone()),
            Vec::new(),
        )
    }

    fn assemble(
        &self,
        trace: &RequestTrace,
        wrapped: WrappedResponse,
        status: ResultStatus,
        kind: AuditKind,
        detail: Option<String>,
        missing_fields: Vec<String>,
    ) -> Assembled {
        let audit_id = Uuid::now_v7();
        let ticket = wrapped.decision.escalation.clone();
        let escalation_id = ticket.as_ref().map(|t| t.id.clone());

        let result = CapabilityResult {
            capability: wrapped.capability,
            status,
            data: wrapped.data,
            confidence: wrapped.confidence,
            confidence_tier: wrapped.tier,
            reasoning: wrapped.reasoning,
            disclaimer: wrapped.decision.disclaimer,
            disclaimer_category: wrapped.decision.disclaimer_category,
            red_flags: wrapped.red_flags,
            review_note: wrapped.decision.review_note,
            escalation_id: escalation_id.clone(),
            audit_id,
            missing_fields,
        };

        let output = self.redactor.redact(&json!({
            "data": result.data,
            "reasoning": result.reasoning,
            "red_flags": result.red_flags,
        }));
        let mut redacted_fields = trace.redacted_fields.clone();
        redacted_fields.extend(output.removed.into_iter().map(|path| format!("output.{path}")));

        let record = AuditRecord {
            id: audit_id,
            request_id: trace.request_id,
            timestamp: Utc::now(),
            agent_name: result.capability.clone(),
            kind,
            user_digest: trace.user_digest.clone(),
            urgency: trace.urgency,
            pre_confidence: wrapped.pre_confidence,
            post_confidence: result.confidence,
            review_status: if escalation_id.is_some() {
                ReviewStatus::Pending
            } else {
                ReviewStatus::NotRequired
            },
            escalation_id,
            input_digest: trace.input_digest.clone(),
            output_digest: digest_json(&output.value),
            redacted_fields,
            detail,
            review: None,
        };

        Assembled {
            result,
            record,
            ticket,
        }
    }

    /// Writes every escalation and audit record of the request in one batch.
    /// Nothing is returned to the caller until the batch is stored, and a failed
    /// batch leaves nothing behind.
    async fn persist(&self, assembled: &[Assembled]) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let escalations: Vec<EscalationRecord> = assembled
            .iter()
            .filter_map(|a| a.ticket.as_ref())
            .map(|ticket| EscalationRecord::from_ticket(ticket, now))
            .collect();
        let records: Vec<AuditRecord> = assembled.iter().map(|a| a.record.clone()).collect();

        let inserted = self.audit.append_batch(records, escalations).await?;

        for ticket in assembled.iter().filter_map(|a| a.ticket.as_ref()) {
            if inserted.contains(&ticket.id) {
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    request_id = %ticket.request_id,
                    capability = %ticket.capability,
                    escalation_id = %ticket.id,
                    "Escalation raised for human review"
                );
            }
        }
        for entry in assembled {
            tracing::debug!(
                audit_id = %entry.record.id,
                capability = %entry.record.agent_name,
                kind = entry.record.kind.as_str(),
                "Audit record written"
            );
        }
        Ok(())
    }

    async fn respond_unclassified(
        &self,
        trace: &RequestTrace,
        intent: IntentResult,
        prompt: &str,
    ) -> Result<AggregatedResponse, OrchestratorError> {
        let record = AuditRecord {
            id: Uuid::now_v7(),
            request_id: trace.request_id,
            timestamp: Utc::now(),
            agent_name: CLASSIFIER_AGENT.to_string(),
            kind: AuditKind::ClassificationFailure,
            user_digest: trace.user_digest.clone(),
            urgency: UrgencyLevel::Routine,
            pre_confidence: 0.0,
            post_confidence: 0.0,
            escalation_id: None,
            input_digest: trace.input_digest.clone(),
            output_digest: digest_json(&json!({ "clarification": prompt })),
            redacted_fields: trace.redacted_fields.clone(),
            detail: Some(intent.reasoning.clone()),
            review_status: ReviewStatus::NotRequired,
            review: None,
        };
        let audit_id = record.id;
        self.audit.append(record).await?;

        tracing::info!(
            request_id = %trace.request_id,
            audit_id = %audit_id,
            reason = %intent.reasoning,
            "Request unclassified; asking for clarification"
        );

        Ok(AggregatedResponse {
            request_id: trace.request_id,
            success: false,
            primary_capability: intent.primary,
            urgency: UrgencyLevel::Routine,
            confidence: 0.0,
            emergency: false,
            results: Vec::new(),
            audit_id,
            escalations: Vec::new(),
            clarification: Some(prompt.to_string()),
        })
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityInfo> {
        self.registry
            .list_all()
            .iter()
            .map(|d| CapabilityInfo::from(d.as_ref()))
            .collect()
    }

    pub async fn get_audit_record(&self, id: Uuid) -> Result<AuditRecord, OrchestratorError> {
        Ok(self.audit.get(id).await?)
    }

    pub async fn list_audit_records(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditRecord>, OrchestratorError> {
        Ok(self.audit.list(filter).await?)
    }

    pub async fn review_audit_record(
        &self,
        id: Uuid,
        submission: ReviewSubmission,
    ) -> Result<AuditRecord, OrchestratorError> {
        if submission.reviewer_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidReview {
                field: "reviewer_id",
                reason: "reviewer_id must not be empty".to_string(),
            });
        }
        let override_reason = submission
            .override_reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if submission.override_decision && override_reason.is_none() {
            return Err(OrchestratorError::InvalidReview {
                field: "override_reason",
                reason: "override_reason is required when override is true".to_string(),
            });
        }

        let review = ReviewInfo {
            reviewer_digest: hash_user_id(&submission.reviewer_id),
            reviewed_at: Utc::now(),
            notes: submission.notes.filter(|n| !n.trim().is_empty()),
            overridden: submission.override_decision,
            override_reason,
        };
        let record = self.audit.set_review(id, review).await?;
        tracing::info!(
            audit_id = %id,
            capability = %record.agent_name,
            overridden = submission.override_decision,
            "Audit record reviewed"
        );
        Ok(record)
    }

    pub async fn list_escalations(
        &self,
        pending_only: bool,
    ) -> Result<Vec<EscalationRecord>, OrchestratorError> {
        Ok(self.audit.list_escalations(pending_only).await?)
    }

    pub async fn agent_statistics(
        &self,
        agent_name: &str,
    ) -> Result<AgentStatistics, OrchestratorError> {
        Ok(self.audit.agent_statistics(agent_name).await?)
    }

    pub async fn health(&self) -> OrchestratorHealth {
        let audit_reachable = match self.audit.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "Audit store unreachable");
                false
            }
        };
        OrchestratorHealth {
            status: if audit_reachable { "ok" } else { "degraded" }.to_string(),
            total_capabilities: self.registry.len(),
            enabled_capabilities: self.registry.enabled_count(),
            audit_backend: self.audit.backend().to_string(),
            audit_reachable,
            per_call_timeout_ms: self.config.per_call_timeout.as_millis() as u64,
            request_deadline_ms: self.config.request_deadline.as_millis() as u64,
            counters: self.counters.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::audit::MemoryAuditStore;
    use crate::capability::CapabilityProvider;
    use crate::error::{AuditError, ProviderError};
    use crate::providers::register_reference_providers;

    struct Fixed(AgentResponse);

    #[async_trait]
    impl CapabilityProvider for Fixed {
        async fn process(&self, _: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
            Ok(self.0.clone())
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["fixed".into()]
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl CapabilityProvider for Slow {
        async fn process(&self, _: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
            tokio::time::sleep(self.0).await;
            Ok(AgentResponse::ok(json!({ "late": true }), 0.9))
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["slow".into()]
        }
    }

    struct Failing;

    #[async_trait]
    impl CapabilityProvider for Failing {
        async fn process(&self, _: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
            Err(ProviderError::Unavailable("backend offline".into()))
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["failing".into()]
        }
    }

    struct Panicking;

    #[async_trait]
    impl CapabilityProvider for Panicking {
        async fn process(&self, _: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
            panic!("provider bug");
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["panicking".into()]
        }
    }

    fn reference_orchestrator() -> (Orchestrator, Arc<MemoryAuditStore>) {
        let registry = Arc::new(AgentRegistry::new());
        register_reference_providers(&registry).unwrap();
        let store = Arc::new(MemoryAuditStore::new());
        let orchestrator = Orchestrator::new(registry, store.clone(), OrchestratorConfig::default());
        (orchestrator, store)
    }

    fn descriptor(name: &str, phrase: &str) -> AgentDescriptor {
        AgentDescriptor::new(name, CapabilityCategory::General)
            .threshold(0.5)
            .trigger(phrase, 1.0)
    }

    fn custom_orchestrator(
        agents: Vec<(AgentDescriptor, Arc<dyn CapabilityProvider>)>,
        config: OrchestratorConfig,
    ) -> (Orchestrator, Arc<MemoryAuditStore>) {
        let registry = Arc::new(AgentRegistry::new());
        for (descriptor, handler) in agents {
            registry.register(descriptor, handler).unwrap();
        }
        let store = Arc::new(MemoryAuditStore::new());
        (Orchestrator::new(registry, store.clone(), config), store)
    }

    #[tokio::test]
    async fn cardiac_emergency_routes_to_triage_and_escalates_once() {
        let (orchestrator, store) = reference_orchestrator();
        let response = orchestrator
            .submit(ClinicalRequest::new(
                "patient-1",
                "Severe chest pain radiating to left arm, sweating, shortness of breath",
            ))
            .await
            .unwrap();

        assert_eq!(response.primary_capability, "triage");
        assert_eq!(response.urgency, UrgencyLevel::Emergency);
        assert_eq!(response.confidence, 1.0);
        assert!(response.emergency);
        assert_eq!(response.results.len(), 1);
        assert_eq!(
            response.results[0].disclaimer_category,
            CapabilityCategory::Emergency
        );
        assert_eq!(response.escalations.len(), 1);
        assert_eq!(store.list_escalations(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_emergency_cue_yields_exactly_one_escalation() {
        let (orchestrator, store) = reference_orchestrator();
        let inputs = [
            "This is an emergency",
            "call 911 my father collapsed",
            "I think I am having a heart attack",
            "sudden facial droop and slurred speech",
            "she overdosed on pills",
        ];
        for text in inputs {
            let response = orchestrator
                .submit(ClinicalRequest::new("patient-1", text))
                .await
                .unwrap();
            assert!(response.emergency, "{text}");
            assert_eq!(response.escalations.len(), 1, "{text}");
        }
        assert_eq!(store.list_escalations(true).await.unwrap().len(), inputs.len());
    }

    #[tokio::test]
    async fn medication_question_routes_to_drug_info() {
        let (orchestrator, _) = reference_orchestrator();
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "What are side effects of aspirin?"))
            .await
            .unwrap();

        assert_eq!(response.primary_capability, "drug_info");
        assert_eq!(response.urgency, UrgencyLevel::Routine);
        assert!(!response.emergency);
        assert!(response.success);
        assert_eq!(response.results[0].capability, "drug_info");
        assert_eq!(response.results[0].status, ResultStatus::Completed);
        assert_eq!(
            response.results[0].disclaimer_category,
            CapabilityCategory::Medication
        );
    }

    #[tokio::test]
    async fn nonsense_input_asks_for_clarification() {
        let (orchestrator, store) = reference_orchestrator();
        for text in ["", "asdf qwerty zxcv"] {
            let response = orchestrator
                .submit(ClinicalRequest::new("patient-1", text))
                .await
                .unwrap();
            assert_eq!(response.primary_capability, "unclassified");
            assert!(!response.emergency);
            assert!(response.results.is_empty());
            assert_eq!(response.clarification.as_deref(), Some(CLARIFICATION_PROMPT));

            let record = store.get(response.audit_id).await.unwrap();
            assert_eq!(record.kind, AuditKind::ClassificationFailure);
            assert_eq!(record.agent_name, CLASSIFIER_AGENT);
        }
        assert!(store.list_escalations(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_ids_resolve_to_matching_records() {
        let (orchestrator, _) = reference_orchestrator();
        let response = orchestrator
            .submit(
                ClinicalRequest::new("patient-1", "I have a fever and cough, what do I have?")
                    .with_context("age", json!(34))
                    .with_context("email", json!("jane@example.com")),
            )
            .await
            .unwrap();

        assert!(response.results.len() >= 2);
        for result in &response.results {
            let record = orchestrator.get_audit_record(result.audit_id).await.unwrap();
            assert_eq!(record.agent_name, result.capability);
            assert_eq!(record.post_confidence, result.confidence);
            assert_eq!(record.escalation_id, result.escalation_id);
            assert_eq!(record.redacted_fields, vec!["context.email"]);
            assert_ne!(record.user_digest, "patient-1");
        }
        let primary = orchestrator.get_audit_record(response.audit_id).await.unwrap();
        assert_eq!(primary.agent_name, response.primary_capability);
    }

    #[tokio::test]
    async fn missing_context_short_circuits_without_invoking_handler() {
        let (orchestrator, store) = reference_orchestrator();
        let response = orchestrator
            .submit(ClinicalRequest::new(
                "patient-1",
                "I have a fever and cough, what do I have?",
            ))
            .await
            .unwrap();

        assert_eq!(response.primary_capability, "triage");
        let diagnostic = response
            .results
            .iter()
            .find(|r| r.capability == "diagnostic_support")
            .expect("diagnostic support was routed");
        assert_eq!(diagnostic.status, ResultStatus::MissingInformation);
        assert_eq!(diagnostic.missing_fields, vec!["age"]);

        let record = store.get(diagnostic.audit_id).await.unwrap();
        assert_eq!(record.kind, AuditKind::ValidationFailure);
        assert_eq!(orchestrator.counters().agent_execution_failures, 0);
    }

    #[tokio::test]
    async fn slow_sibling_is_marked_timed_out_within_deadline() {
        let config = OrchestratorConfig::default()
            .with_timeouts(Duration::from_secs(5), Duration::from_millis(200));
        let (orchestrator, store) = custom_orchestrator(
            vec![
                (
                    descriptor("fast_lookup", "alpha"),
                    Arc::new(Fixed(AgentResponse::ok(json!({ "answer": 42 }), 0.9))),
                ),
                (
                    descriptor("slow_lookup", "alpha"),
                    Arc::new(Slow(Duration::from_secs(10))),
                ),
            ],
            config,
        );

        let started = Instant::now();
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "alpha"))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let fast = response.results.iter().find(|r| r.capability == "fast_lookup").unwrap();
        assert_eq!(fast.status, ResultStatus::Completed);
        assert_eq!(fast.data, json!({ "answer": 42 }));

        let slow = response.results.iter().find(|r| r.capability == "slow_lookup").unwrap();
        assert_eq!(slow.status, ResultStatus::TimedOut);
        assert_eq!(store.get(slow.audit_id).await.unwrap().kind, AuditKind::TimedOut);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn per_call_timeout_applies_to_each_capability() {
        let config = OrchestratorConfig::default()
            .with_timeouts(Duration::from_millis(50), Duration::from_secs(5));
        let (orchestrator, _) = custom_orchestrator(
            vec![(
                descriptor("slow_lookup", "alpha"),
                Arc::new(Slow(Duration::from_secs(10))) as Arc<dyn CapabilityProvider>,
            )],
            config,
        );
        let started = Instant::now();
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "alpha"))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(response.results[0].status, ResultStatus::TimedOut);
        assert!(!response.success);
        assert_eq!(orchestrator.counters().agent_execution_failures, 1);
    }

    #[tokio::test]
    async fn failures_and_panics_degrade_without_aborting_siblings() {
        let (orchestrator, store) = custom_orchestrator(
            vec![
                (
                    descriptor("steady", "alpha"),
                    Arc::new(Fixed(AgentResponse::ok(json!({ "ok": true }), 0.8))),
                ),
                (descriptor("failing", "alpha"), Arc::new(Failing)),
                (descriptor("panicking", "alpha"), Arc::new(Panicking)),
            ],
            OrchestratorConfig::default(),
        );

        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "alpha"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.results.len(), 3);
        for name in ["failing", "panicking"] {
            let result = response.results.iter().find(|r| r.capability == name).unwrap();
            assert_eq!(result.status, ResultStatus::Degraded);
            assert_eq!(result.confidence, 0.0);
            let record = store.get(result.audit_id).await.unwrap();
            assert_eq!(record.kind, AuditKind::AgentExecutionFailure);
        }
        assert_eq!(orchestrator.counters().agent_execution_failures, 2);
    }

    #[tokio::test]
    async fn hard_violation_is_blocked_counted_and_escalated() {
        let (orchestrator, store) = custom_orchestrator(
            vec![(
                descriptor("dosing", "alpha"),
                Arc::new(Fixed(AgentResponse::ok(
                    json!({ "advice": "Give 40 mg now." }),
                    0.9,
                ))) as Arc<dyn CapabilityProvider>,
            )],
            OrchestratorConfig::default(),
        );

        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "alpha"))
            .await
            .unwrap();
        let result = &response.results[0];
        assert_eq!(result.status, ResultStatus::Blocked);
        assert!(response.emergency);
        assert_eq!(store.get(result.audit_id).await.unwrap().kind, AuditKind::SafetyViolation);
        assert_eq!(orchestrator.counters().safety_violations, 1);
    }

    #[tokio::test]
    async fn escalated_results_are_surfaced_first() {
        let (orchestrator, _) = custom_orchestrator(
            vec![
                (
                    descriptor("calm", "alpha").trigger("beta", 0.5),
                    Arc::new(Fixed(AgentResponse::ok(json!({}), 0.9))),
                ),
                (
                    descriptor("worried", "alpha"),
                    Arc::new(Fixed(
                        AgentResponse::ok(json!({}), 0.9).with_red_flags(["bleeding"]),
                    )),
                ),
            ],
            OrchestratorConfig::default(),
        );
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "alpha beta"))
            .await
            .unwrap();
        assert_eq!(response.primary_capability, "calm");
        assert_eq!(response.results[0].capability, "worried");
        assert!(response.results[0].escalation_id.is_some());
        assert!(response.emergency);
        let primary = orchestrator.get_audit_record(response.audit_id).await.unwrap();
        assert_eq!(primary.agent_name, "calm");
    }

    #[tokio::test]
    async fn emergency_without_emergency_capability_escalates_at_request_level() {
        let (orchestrator, store) = custom_orchestrator(
            vec![(
                descriptor("drug_info", "aspirin"),
                Arc::new(Fixed(AgentResponse::ok(json!({}), 0.9))) as Arc<dyn CapabilityProvider>,
            )],
            OrchestratorConfig::default(),
        );
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "this is an emergency"))
            .await
            .unwrap();

        assert!(response.emergency);
        assert_eq!(response.urgency, UrgencyLevel::Emergency);
        assert_eq!(response.escalations.len(), 1);
        assert_eq!(response.results[0].capability, REQUEST_LEVEL_CAPABILITY);
        let record = store.get(response.audit_id).await.unwrap();
        assert_eq!(record.kind, AuditKind::EmergencyEscalation);
        assert_eq!(store.list_escalations(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_requests_route_identically() {
        let (orchestrator, _) = reference_orchestrator();
        for text in [
            "What are side effects of aspirin?",
            "Severe chest pain radiating to left arm, sweating",
            "explain hypertension in simple terms",
        ] {
            let first = orchestrator.submit(ClinicalRequest::new("p", text)).await.unwrap();
            let second = orchestrator.submit(ClinicalRequest::new("p", text)).await.unwrap();
            assert_eq!(first.primary_capability, second.primary_capability);
            assert_eq!(first.emergency, second.emergency);
        }
    }

    struct BrokenClassifier;

    impl IntentClassifier for BrokenClassifier {
        fn classify(
            &self,
            _: &ClassifierInput,
            _: &[Arc<AgentDescriptor>],
        ) -> Result<IntentResult, ClassificationError> {
            Err(ClassificationError::Internal("lexicon not loaded".into()))
        }
    }

    #[tokio::test]
    async fn classifier_failure_is_audited_and_never_escalated() {
        let (orchestrator, store) = reference_orchestrator();
        let orchestrator = orchestrator.with_classifier(Arc::new(BrokenClassifier));
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "call 911"))
            .await
            .unwrap();

        assert_eq!(response.urgency, UrgencyLevel::Routine);
        assert!(!response.emergency);
        assert!(response.clarification.is_some());
        let record = store.get(response.audit_id).await.unwrap();
        assert_eq!(record.kind, AuditKind::ClassificationFailure);
        assert!(record.detail.unwrap().contains("lexicon not loaded"));
        assert!(store.list_escalations(false).await.unwrap().is_empty());
    }

    struct UnavailableStore;

    #[async_trait]
    impl AuditStore for UnavailableStore {
        async fn append(&self, _: AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Backend("disk full".into()))
        }
        async fn get(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
            Err(AuditError::NotFound(id.to_string()))
        }
        async fn list(&self, _: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }
        async fn set_review(&self, id: Uuid, _: ReviewInfo) -> Result<AuditRecord, AuditError> {
            Err(AuditError::NotFound(id.to_string()))
        }
        async fn append_batch(
            &self,
            _: Vec<AuditRecord>,
            _: Vec<EscalationRecord>,
        ) -> Result<Vec<String>, AuditError> {
            Err(AuditError::Backend("disk full".into()))
        }
        async fn record_escalation(&self, _: EscalationRecord) -> Result<bool, AuditError> {
            Ok(true)
        }
        async fn list_escalations(&self, _: bool) -> Result<Vec<EscalationRecord>, AuditError> {
            Ok(Vec::new())
        }
        async fn agent_statistics(&self, name: &str) -> Result<AgentStatistics, AuditError> {
            Ok(AgentStatistics::from_records(name, []))
        }
        async fn ping(&self) -> Result<(), AuditError> {
            Err(AuditError::Backend("disk full".into()))
        }
        fn backend(&self) -> &'static str {
            "unavailable"
        }
    }

    /// Accepts single writes until the first one lands, then reports the backend
    /// as gone. A batch rolls back as a whole.
    struct FailingAfterFirstWrite {
        inner: MemoryAuditStore,
        writes: AtomicU64,
    }

    impl FailingAfterFirstWrite {
        fn new() -> Self {
            Self {
                inner: MemoryAuditStore::new(),
                writes: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl AuditStore for FailingAfterFirstWrite {
        async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(AuditError::Backend("connection reset".into()));
            }
            self.inner.append(record).await
        }
        async fn get(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
            self.inner.get(id).await
        }
        async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            self.inner.list(filter).await
        }
        async fn set_review(&self, id: Uuid, review: ReviewInfo) -> Result<AuditRecord, AuditError> {
            self.inner.set_review(id, review).await
        }
        async fn append_batch(
            &self,
            _: Vec<AuditRecord>,
            _: Vec<EscalationRecord>,
        ) -> Result<Vec<String>, AuditError> {
            Err(AuditError::Backend("connection reset".into()))
        }
        async fn record_escalation(&self, escalation: EscalationRecord) -> Result<bool, AuditError> {
            self.inner.record_escalation(escalation).await
        }
        async fn list_escalations(&self, pending: bool) -> Result<Vec<EscalationRecord>, AuditError> {
            self.inner.list_escalations(pending).await
        }
        async fn agent_statistics(&self, name: &str) -> Result<AgentStatistics, AuditError> {
            self.inner.agent_statistics(name).await
        }
        async fn ping(&self) -> Result<(), AuditError> {
            Ok(())
        }
        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn failed_audit_write_leaves_no_partial_trail() {
        let registry = Arc::new(AgentRegistry::new());
        register_reference_providers(&registry).unwrap();
        let store = Arc::new(FailingAfterFirstWrite::new());
        let orchestrator =
            Orchestrator::new(registry, store.clone(), OrchestratorConfig::default());

        let result = orchestrator
            .submit(ClinicalRequest::new(
                "patient-1",
                "call 911 my father collapsed, he has chest pain and I am worried about his medication",
            ))
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Audit(AuditError::Backend(_)))
        ));

        assert!(store.inner.is_empty().await);
        assert!(store.inner.list_escalations(false).await.unwrap().is_empty());
        assert_eq!(orchestrator.health().await.counters.escalations, 0);
    }

    #[tokio::test]
    async fn long_emergency_request_still_escalates() {
        let (orchestrator, store) = reference_orchestrator();
        let text = format!(
            "{} call 911 my father collapsed",
            "background history. ".repeat(450)
        );
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", text))
            .await
            .unwrap();

        assert!(response.emergency);
        assert!(response.clarification.is_none());
        assert_eq!(response.escalations.len(), 1);
        assert_eq!(store.list_escalations(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn response_is_withheld_when_audit_write_fails() {
        let registry = Arc::new(AgentRegistry::new());
        register_reference_providers(&registry).unwrap();
        let orchestrator = Orchestrator::new(
            registry,
            Arc::new(UnavailableStore),
            OrchestratorConfig::default(),
        );

        let result = orchestrator
            .submit(ClinicalRequest::new("patient-1", "What are side effects of aspirin?"))
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Audit(AuditError::Backend(_)))
        ));

        let health = orchestrator.health().await;
        assert_eq!(health.status, "degraded");
        assert!(!health.audit_reachable);
    }

    #[tokio::test]
    async fn review_requires_reason_for_override() {
        let (orchestrator, _) = reference_orchestrator();
        let response = orchestrator
            .submit(ClinicalRequest::new("patient-1", "What are side effects of aspirin?"))
            .await
            .unwrap();

        let missing_reason = orchestrator
            .review_audit_record(
                response.audit_id,
                ReviewSubmission {
                    reviewer_id: "dr-1".into(),
                    notes: None,
                    override_decision: true,
                    override_reason: Some("  ".into()),
                },
            )
            .await;
        assert!(matches!(
            missing_reason,
            Err(OrchestratorError::InvalidReview { field: "override_reason", .. })
        ));

        let reviewed = orchestrator
            .review_audit_record(
                response.audit_id,
                ReviewSubmission {
                    reviewer_id: "dr-1".into(),
                    notes: Some("fine".into()),
                    override_decision: true,
                    override_reason: Some("patient is on warfarin".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(reviewed.review_status, ReviewStatus::Reviewed);

        let stats = orchestrator.agent_statistics("drug_info").await.unwrap();
        assert_eq!(stats.overrides, 1);
        assert_eq!(stats.override_rate, 1.0);
    }

    #[tokio::test]
    async fn health_reports_catalog_and_counters() {
        let (orchestrator, _) = reference_orchestrator();
        orchestrator
            .submit(ClinicalRequest::new("patient-1", "call 911"))
            .await
            .unwrap();
        let health = orchestrator.health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.total_capabilities, 6);
        assert_eq!(health.enabled_capabilities, 6);
        assert_eq!(health.audit_backend, "memory");
        assert_eq!(health.counters.requests, 1);
        assert_eq!(health.counters.escalations, 1);
    }
}
