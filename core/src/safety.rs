//! Safety wrapper applied to every capability response.
//!
//! Steps, in order: prohibited-language softening, hard prohibited-content check,
//! confidence gate, disclaimer injection, escalation decision. The wrapper holds no
//! state; identical inputs always yield identical output.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::capability::{AgentResponse, CapabilityCategory, UrgencyLevel, normalize_confidence};
use crate::escalation::{self, EscalationTicket};
use crate::registry::AgentDescriptor;

pub const LOW_CONFIDENCE_NOTE: &str = "Confidence is below the review threshold for this capability. Seek human review before acting on this result.";

pub const SAFE_FALLBACK_MESSAGE: &str = "This response was withheld because it did not meet safety requirements. A clinician has been notified and will review your request.";

/// Softened output is never shown above this confidence.
pub const SOFTENED_CONFIDENCE_CAP: f64 = 0.75;

pub const DIAGNOSTIC_DISCLAIMER: &str = "CLINICAL DECISION SUPPORT NOTICE: These are possible explanations only, not a diagnosis. A licensed clinician must evaluate your symptoms before any condition is confirmed.";
pub const IMAGE_ANALYSIS_DISCLAIMER: &str = "IMAGING NOTICE: Automated image review is preliminary and may miss or misidentify findings. Every image must be interpreted by a qualified radiologist or clinician.";
pub const MEDICATION_DISCLAIMER: &str = "MEDICATION INFORMATION NOTICE: This information is educational and is not a prescription. Do not start, stop or change any medication without consulting your pharmacist or prescriber.";
pub const EMERGENCY_DISCLAIMER: &str = "EMERGENCY NOTICE: If you believe this is a medical emergency, call your local emergency number (911 in the US) or go to the nearest emergency department now. Do not wait for an online response.";
pub const VOICE_DISCLAIMER: &str = "TRANSCRIPTION NOTICE: Speech transcription may contain errors, especially for drug names and dosages. Verify the transcript before it is used in any clinical record.";
pub const GENERAL_DISCLAIMER: &str = "HEALTH INFORMATION NOTICE: This information is general and does not replace advice from a licensed healthcare professional.";

pub fn disclaimer_for(category: CapabilityCategory) -> &'static str {
    match category {
        CapabilityCategory::Diagnostic => DIAGNOSTIC_DISCLAIMER,
        CapabilityCategory::ImageAnalysis => IMAGE_ANALYSIS_DISCLAIMER,
        CapabilityCategory::Medication => MEDICATION_DISCLAIMER,
        CapabilityCategory::Emergency => EMERGENCY_DISCLAIMER,
        CapabilityCategory::Voice => VOICE_DISCLAIMER,
        CapabilityCategory::General => GENERAL_DISCLAIMER,
    }
}

/// Display tier derived from confidence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryLow,
    Low,
    Moderate,
    High,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.80 {
            Self::High
        } else if confidence >= 0.50 {
            Self::Moderate
        } else if confidence >= 0.20 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

struct SoftenRule {
    id: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

const SOFTEN_RULE_SOURCES: [(&str, &str, &str); 8] = [
    (
        "definitive_diagnosis",
        r"(?i)\byou (definitely|certainly|clearly|obviously) have\b",
        "you may have",
    ),
    (
        "diagnosis_statement",
        r"(?i)\bthe diagnosis is\b",
        "one possible explanation is",
    ),
    (
        "certain_assertion",
        r"(?i)\b(this|it) is (definitely|certainly|clearly)\b",
        "$1 may be",
    ),
    (
        "suffering_from",
        r"(?i)\byou are suffering from\b",
        "your symptoms may be consistent with",
    ),
    (
        "prescribing",
        r"(?i)\bi (prescribe|am prescribing|recommend you take)\b",
        "a clinician may consider",
    ),
    (
        "take_directive",
        r"(?i)\byou (should|must|need to) take\b",
        "ask your clinician whether to take",
    ),
    (
        "stop_directive",
        r"(?i)\b(stop|discontinue) taking\b",
        "talk to your clinician before you stop taking",
    ),
    (
        "no_doctor_needed",
        r"(?i)\b(there is no need to|no need to|you do not need to|you dont need to) see a doctor\b",
        "consider checking with a clinician",
    ),
];

static SOFTEN_RULES: LazyLock<Vec<SoftenRule>> = LazyLock::new(|| {
    SOFTEN_RULE_SOURCES
        .iter()
        .map(|(id, pattern, replacement)| SoftenRule {
            id,
            pattern: Regex::new(pattern).expect("valid soften rule regex"),
            replacement,
        })
        .collect()
});

/// Content that must never reach the caller, even after softening.
static HARD_PROHIBITED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "dose_directive",
            r"(?i)\b(take|give|administer|inject)\s+\d+(\.\d+)?\s*(mg|mcg|g|ml|units?)\b",
        ),
        (
            "cure_guarantee",
            r"(?i)\b(guaranteed cure|guaranteed to cure|100% cure)\b",
        ),
        (
            "self_harm_method",
            r"(?i)\bhow to (overdose|kill yourself|end your life)\b",
        ),
    ]
    .into_iter()
    .map(|(id, pattern)| (id, Regex::new(pattern).expect("valid prohibited content regex")))
    .collect()
});

fn soften_text(text: &str, rewrites: &mut BTreeSet<&'static str>) -> String {
    let mut out = text.to_string();
    for rule in SOFTEN_RULES.iter() {
        if rule.pattern.is_match(&out) {
            out = rule
                .pattern
                .replace_all(&out, |caps: &Captures| {
                    let mut rewritten = String::new();
                    caps.expand(rule.replacement, &mut rewritten);
                    follow_leading_case(&caps[0], rewritten)
                })
                .into_owned();
            rewrites.insert(rule.id);
        }
    }
    out
}

/// Capitalise the rewrite when the phrase it replaces opened a sentence.
fn follow_leading_case(matched: &str, rewritten: String) -> String {
    if !matched.starts_with(char::is_uppercase) {
        return rewritten;
    }
    let mut chars = rewritten.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => rewritten,
    }
}

fn soften_value(value: &Value, rewrites: &mut BTreeSet<&'static str>) -> Value {
    match value {
        Value::String(s) => Value::String(soften_text(s, rewrites)),
        Value::Array(items) => Value::Array(items.iter().map(|v| soften_value(v, rewrites)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), soften_value(v, rewrites)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn prohibited_in_text(text: &str) -> Option<&'static str> {
    HARD_PROHIBITED
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(id, _)| *id)
}

fn prohibited_in_value(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(s) => prohibited_in_text(s),
        Value::Array(items) => items.iter().find_map(prohibited_in_value),
        Value::Object(map) => map.values().find_map(prohibited_in_value),
        _ => None,
    }
}

/// Trim, drop blanks and duplicates, keep first-seen order.
pub fn normalize_red_flags(flags: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    flags
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty() && seen.insert(f.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SafetyDecision {
    /// Disclaimer attached verbatim
    pub disclaimer: String,
    pub disclaimer_category: CapabilityCategory,
    /// Prohibited phrasing was rewritten into hedged language
    pub softened: bool,
    /// Output was replaced by the safe fallback message
    pub blocked: bool,
    /// Identifiers of the rewrite rules that fired
    pub rewrites: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    /// Hard prohibited-content rule that forced the block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<String>,
    pub escalation: Option<EscalationTicket>,
}

/// A capability response after safety post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WrappedResponse {
    pub capability: String,
    pub success: bool,
    pub data: Value,
    pub reasoning: Option<String>,
    pub red_flags: Vec<String>,
    /// Provider confidence, normalized to [0,1]
    pub pre_confidence: f64,
    /// Confidence after softening caps and blocks
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub decision: SafetyDecision,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyWrapper;

impl SafetyWrapper {
    pub fn new() -> Self {
        Self
    }

    pub fn wrap(
        &self,
        request_id: Uuid,
        descriptor: &AgentDescriptor,
        urgency: UrgencyLevel,
        response: &AgentResponse,
    ) -> WrappedResponse {
        let pre_confidence = normalize_confidence(response.confidence);

        let mut rewrites = BTreeSet::new();
        let data = match &response.data {
            Value::Null => json!({}),
            other => soften_value(other, &mut rewrites),
        };
        let reasoning = response
            .reasoning
            .as_deref()
            .map(|r| soften_text(r, &mut rewrites));
        let softened = !rewrites.is_empty();

        let violation = prohibited_in_value(&data)
            .or_else(|| reasoning.as_deref().and_then(prohibited_in_text));
        let red_flags = normalize_red_flags(&response.red_flags);

        let mut confidence = pre_confidence;
        if softened {
            confidence = confidence.min(SOFTENED_CONFIDENCE_CAP);
        }
        let (data, reasoning) = if violation.is_some() {
            confidence = 0.0;
            (json!({ "message": SAFE_FALLBACK_MESSAGE }), None)
        } else {
            (data, reasoning)
        };

        let below_threshold = confidence < descriptor.confidence_threshold;
        let mut tier = ConfidenceTier::from_confidence(confidence);
        if below_threshold {
            tier = tier.min(ConfidenceTier::Low);
        }

        let disclaimer_category = if urgency == UrgencyLevel::Emergency {
            CapabilityCategory::Emergency
        } else {
            descriptor.category
        };

        let escalation = escalation::evaluate(
            request_id,
            &descriptor.name,
            urgency,
            &red_flags,
            violation.is_some(),
        );

        WrappedResponse {
            capability: descriptor.name.clone(),
            success: response.success && violation.is_none(),
            data,
            reasoning,
            red_flags,
            pre_confidence,
            confidence,
            tier,
            decision: SafetyDecision {
                disclaimer: disclaimer_for(disclaimer_category).to_string(),
                disclaimer_category,
                softened,
                blocked: violation.is_some(),
                rewrites: rewrites.into_iter().map(str::to_string).collect(),
                review_note: below_threshold.then(|| LOW_CONFIDENCE_NOTE.to_string()),
                violation: violation.map(str::to_string),
                escalation,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drug_info() -> AgentDescriptor {
        AgentDescriptor::new("drug_info", CapabilityCategory::Medication).threshold(0.7)
    }

    fn wrap(response: &AgentResponse, urgency: UrgencyLevel) -> WrappedResponse {
        SafetyWrapper::new().wrap(Uuid::nil(), &drug_info(), urgency, response)
    }

    #[test]
    fn confident_response_passes_through_with_disclaimer() {
        let response = AgentResponse::ok(json!({ "summary": "Aspirin can upset the stomach." }), 0.85);
        let wrapped = wrap(&response, UrgencyLevel::Routine);

        assert_eq!(wrapped.tier, ConfidenceTier::High);
        assert_eq!(wrapped.confidence, 0.85);
        assert_eq!(wrapped.decision.disclaimer, MEDICATION_DISCLAIMER);
        assert_eq!(wrapped.decision.disclaimer_category, CapabilityCategory::Medication);
        assert!(wrapped.decision.review_note.is_none());
        assert!(wrapped.decision.escalation.is_none());
        assert!(!wrapped.decision.softened && !wrapped.decision.blocked);
        assert_eq!(wrapped.data, response.data);
    }

    #[test]
    fn below_threshold_is_never_shown_at_highest_tier() {
        let descriptor = AgentDescriptor::new("strict", CapabilityCategory::General).threshold(0.95);
        for confidence in [0.0, 0.19, 0.3, 0.55, 0.8, 0.9, 0.949] {
            let wrapped = SafetyWrapper::new().wrap(
                Uuid::nil(),
                &descriptor,
                UrgencyLevel::Routine,
                &AgentResponse::ok(json!({}), confidence),
            );
            assert!(wrapped.tier <= ConfidenceTier::Low, "confidence {confidence}");
            assert_eq!(wrapped.decision.review_note.as_deref(), Some(LOW_CONFIDENCE_NOTE));
        }
    }

    #[test]
    fn definitive_language_is_softened_and_capped() {
        let response = AgentResponse::ok(
            json!({
                "summary": "You definitely have a stomach ulcer.",
                "advice": ["You should take antacids", 3]
            }),
            0.95,
        )
        .with_reasoning("The diagnosis is peptic ulcer disease.");
        let wrapped = wrap(&response, UrgencyLevel::Routine);

        assert!(wrapped.decision.softened);
        assert_eq!(wrapped.data["summary"], "You may have a stomach ulcer.");
        assert_eq!(wrapped.data["advice"][0], "Ask your clinician whether to take antacids");
        assert_eq!(wrapped.data["advice"][1], 3);
        assert_eq!(
            wrapped.reasoning.as_deref(),
            Some("One possible explanation is peptic ulcer disease.")
        );
        assert_eq!(wrapped.pre_confidence, 0.95);
        assert_eq!(wrapped.confidence, SOFTENED_CONFIDENCE_CAP);
        assert_eq!(
            wrapped.decision.rewrites,
            vec!["definitive_diagnosis", "diagnosis_statement", "take_directive"]
        );
    }

    #[test]
    fn rewrites_keep_the_case_of_the_phrase_they_replace() {
        let response = AgentResponse::ok(
            json!({
                "summary": "Based on this, you definitely have reflux. It is clearly mild.",
                "advice": "STOP TAKING ibuprofen. No need to see a doctor."
            }),
            0.9,
        );
        let wrapped = wrap(&response, UrgencyLevel::Routine);

        assert_eq!(
            wrapped.data["summary"],
            "Based on this, you may have reflux. It may be mild."
        );
        assert_eq!(
            wrapped.data["advice"],
            "Talk to your clinician before you stop taking ibuprofen. Consider checking with a clinician."
        );
    }

    #[test]
    fn hard_prohibited_content_is_blocked_and_escalated() {
        let response = AgentResponse::ok(json!({ "advice": "Take 800 mg every 2 hours." }), 0.9);
        let wrapped = wrap(&response, UrgencyLevel::Routine);

        assert!(wrapped.decision.blocked);
        assert!(!wrapped.success);
        assert_eq!(wrapped.decision.violation.as_deref(), Some("dose_directive"));
        assert_eq!(wrapped.data, json!({ "message": SAFE_FALLBACK_MESSAGE }));
        assert_eq!(wrapped.confidence, 0.0);
        assert_eq!(wrapped.tier, ConfidenceTier::VeryLow);
        let ticket = wrapped.decision.escalation.expect("violation escalates");
        assert_eq!(ticket.reasons, vec![escalation::EscalationReason::SafetyViolation]);
    }

    #[test]
    fn malformed_payload_is_not_fatal() {
        let mut response = AgentResponse::ok(Value::Null, f64::NAN);
        response.reasoning = None;
        let wrapped = wrap(&response, UrgencyLevel::Routine);
        assert_eq!(wrapped.data, json!({}));
        assert_eq!(wrapped.pre_confidence, 0.0);

        let scalar = wrap(&AgentResponse::ok(json!(42), 2.0), UrgencyLevel::Routine);
        assert_eq!(scalar.data, json!(42));
        assert_eq!(scalar.confidence, 1.0);
    }

    #[test]
    fn emergency_urgency_escalates_once_with_emergency_disclaimer() {
        let response = AgentResponse::ok(json!({}), 0.1)
            .with_red_flags(["chest pain", "Chest pain ", "diaphoresis", ""]);
        let wrapped = wrap(&response, UrgencyLevel::Emergency);

        assert_eq!(wrapped.decision.disclaimer_category, CapabilityCategory::Emergency);
        assert_eq!(wrapped.decision.disclaimer, EMERGENCY_DISCLAIMER);
        assert_eq!(wrapped.red_flags, vec!["chest pain", "diaphoresis"]);
        let ticket = wrapped.decision.escalation.expect("emergency escalates");
        assert_eq!(ticket.id, escalation::escalation_id(Uuid::nil(), "drug_info"));
    }

    #[test]
    fn red_flags_escalate_routine_requests() {
        let response = AgentResponse::ok(json!({}), 0.9).with_red_flags(["reported allergy"]);
        let wrapped = wrap(&response, UrgencyLevel::Routine);
        assert!(wrapped.decision.escalation.is_some());
        assert_eq!(wrapped.decision.disclaimer_category, CapabilityCategory::Medication);
    }

    #[test]
    fn wrapping_is_pure() {
        let response = AgentResponse::ok(json!({ "summary": "It is clearly a sprain." }), 0.77)
            .with_red_flags(["swelling"]);
        let first = wrap(&response, UrgencyLevel::Urgent);
        for _ in 0..5 {
            assert_eq!(wrap(&response, UrgencyLevel::Urgent), first);
        }
        assert_eq!(first.data["summary"], "It may be a sprain.");
    }
}
