use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::capability::{AttachmentKind, ClinicalRequest, UrgencyLevel, UserRole};
use crate::error::ClassificationError;
use crate::registry::AgentDescriptor;

pub const UNCLASSIFIED: &str = "unclassified";

/// Fixed precedence used to break score ties. Names not listed here rank after
/// every listed name, in lexicographic order.
pub const CAPABILITY_PRECEDENCE: [&str; 10] = [
    "triage",
    "diagnostic_support",
    "image_analysis",
    "drug_info",
    "voice",
    "communication",
    "health_memory",
    "appointment",
    "referral",
    "health_support",
];

/// Added to a capability's score when the request carries an attachment of the
/// kind the capability declares an affinity for.
pub const ATTACHMENT_AFFINITY_BONUS: f64 = 0.5;

pub const MAX_INPUT_CHARS: usize = 8_000;

static EMERGENCY_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(emergency|911|call an ambulance|heart attack|stroke|cant breathe|cannot breathe|not breathing|unconscious|unresponsive|severe bleeding|bleeding heavily|suicidal|suicide|kill myself|seizure|anaphylaxis|overdose|overdosed)\b",
    )
    .expect("valid emergency terms regex")
});

/// Symptom combinations that are emergencies only when every group matches.
const SYMPTOM_COMBINATIONS: [(&str, &[&str]); 4] = [
    (
        "cardiac: chest pain with radiation and diaphoresis",
        &[
            r"\bchest (pain|pressure|tightness)\b",
            r"\b(radiat\w*|left arm|jaw|shoulder)\b",
            r"\b(sweat\w*|diaphoresis|clammy)\b",
        ],
    ),
    (
        "stroke: facial droop with speech or arm deficit",
        &[
            r"\b(face|facial) (droop\w*|numb\w*)\b",
            r"\b(slurred speech|arm weakness|weak arm|cant speak)\b",
        ],
    ),
    (
        "anaphylaxis: airway swelling with respiratory signs",
        &[
            r"\b(throat|tongue|lips?) (swelling|swollen|closing)\b|\bswollen (throat|tongue|lips?)\b",
            r"\b(hives|wheez\w*|difficulty breathing|trouble breathing)\b",
        ],
    ),
    (
        "meningitis: stiff neck with fever and rash or confusion",
        &[
            r"\bstiff neck\b",
            r"\bfever\b",
            r"\b(rash|confusion|confused)\b",
        ],
    ),
];

static COMBINATION_PATTERNS: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    SYMPTOM_COMBINATIONS
        .iter()
        .map(|(name, groups)| {
            let compiled = groups
                .iter()
                .map(|group| Regex::new(group).expect("valid symptom combination regex"))
                .collect();
            (*name, compiled)
        })
        .collect()
});

static URGENT_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(urgent|urgently|asap|as soon as possible|right away|getting worse|worsening|high fever|severe pain|cant keep anything down)\b",
    )
    .expect("valid urgent terms regex")
});

/// Lowercase, drop apostrophes, turn every other non-alphanumeric run into a
/// single space. Lexicon phrases go through the same function.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Everything the classifier is allowed to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierInput {
    /// Normalized request text
    pub text: String,
    pub attachments: BTreeSet<AttachmentKind>,
    pub role: UserRole,
    raw_chars: usize,
}

impl ClassifierInput {
    pub fn from_request(request: &ClinicalRequest) -> Self {
        Self {
            text: normalize_text(&request.text),
            attachments: request
                .attachments
                .iter()
                .map(|reference| AttachmentKind::from_reference(reference))
                .collect(),
            role: request.role,
            raw_chars: request.text.chars().count(),
        }
    }

    fn contains_phrase(&self, phrase: &str) -> bool {
        // Whole-token match: both sides are normalized to single-space separated tokens.
        format!(" {} ", self.text).contains(&format!(" {phrase} "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CapabilityScore {
    pub capability: String,
    pub score: f64,
    pub threshold: f64,
}

/// Result of classifying one request. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IntentResult {
    /// Primary capability, or "unclassified"
    pub primary: String,
    /// Other qualifying capabilities by descending score
    pub secondary: Vec<String>,
    pub urgency: UrgencyLevel,
    pub confidence: f64,
    /// Qualifying candidates with their scores
    pub candidates: Vec<CapabilityScore>,
    /// Emergency cues that fired, if any
    pub emergency_cues: Vec<String>,
    pub reasoning: String,
}

impl IntentResult {
    pub fn unclassified(reasoning: impl Into<String>) -> Self {
        Self {
            primary: UNCLASSIFIED.to_string(),
            secondary: Vec::new(),
            urgency: UrgencyLevel::Routine,
            confidence: 0.0,
            candidates: Vec::new(),
            emergency_cues: Vec::new(),
            reasoning: reasoning.into(),
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.primary == UNCLASSIFIED
    }

    /// Capabilities to dispatch: primary first, then secondaries.
    pub fn routed_capabilities(&self) -> Vec<String> {
        if self.is_unclassified() {
            return Vec::new();
        }
        std::iter::once(self.primary.clone())
            .chain(self.secondary.iter().cloned())
            .collect()
    }
}

/// Seam for intent classification. Any replacement (for example a learned model)
/// must keep the `IntentResult` contract.
pub trait IntentClassifier: Send + Sync {
    fn classify(
        &self,
        input: &ClassifierInput,
        catalog: &[Arc<AgentDescriptor>],
    ) -> Result<IntentResult, ClassificationError>;
}

/// Deterministic weighted-lexicon classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    emergency_capability: String,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new("triage")
    }
}

impl KeywordClassifier {
    pub fn new(emergency_capability: impl Into<String>) -> Self {
        Self {
            emergency_capability: emergency_capability.into(),
        }
    }

    /// Raw score: sum of matched phrase weights plus attachment bonus, capped at 1.
    pub fn score(&self, input: &ClassifierInput, descriptor: &AgentDescriptor) -> f64 {
        let lexical: f64 = descriptor
            .triggers
            .iter()
            .filter(|trigger| input.contains_phrase(&trigger.phrase))
            .map(|trigger| trigger.weight)
            .sum();
        let bonus = match descriptor.attachment_affinity {
            Some(kind) if input.attachments.contains(&kind) => ATTACHMENT_AFFINITY_BONUS,
            _ => 0.0,
        };
        (lexical + bonus).min(1.0)
    }
}

/// Emergency cues present in normalized text: explicit terms first, then
/// symptom combinations.
pub fn emergency_cues(normalized: &str) -> Vec<String> {
    let mut cues: Vec<String> = EMERGENCY_TERMS
        .find_iter(normalized)
        .map(|m| m.as_str().to_string())
        .collect();
    cues.sort();
    cues.dedup();
    for (name, groups) in COMBINATION_PATTERNS.iter() {
        if groups.iter().all(|group| group.is_match(normalized)) {
            cues.push((*name).to_string());
        }
    }
    cues
}

pub fn has_urgent_cue(normalized: &str) -> bool {
    URGENT_TERMS.is_match(normalized)
}

fn precedence_rank(name: &str) -> usize {
    CAPABILITY_PRECEDENCE
        .iter()
        .position(|candidate| *candidate == name)
        .unwrap_or(CAPABILITY_PRECEDENCE.len())
}

/// Descending score, then fixed precedence, then name.
pub fn compare_candidates(a: &CapabilityScore, b: &CapabilityScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| precedence_rank(&a.capability).cmp(&precedence_rank(&b.capability)))
        .then_with(|| a.capability.cmp(&b.capability))
}

impl IntentClassifier for KeywordClassifier {
    fn classify(
        &self,
        input: &ClassifierInput,
        catalog: &[Arc<AgentDescriptor>],
    ) -> Result<IntentResult, ClassificationError> {
        // Emergency cues are honoured at any length; only cue-free text is capped.
        let cues = emergency_cues(&input.text);
        if cues.is_empty() && input.raw_chars > MAX_INPUT_CHARS {
            return Err(ClassificationError::InputTooLong {
                len: input.raw_chars,
                max: MAX_INPUT_CHARS,
            });
        }

        let routable: Vec<&AgentDescriptor> = catalog
            .iter()
            .map(Arc::as_ref)
            .filter(|d| d.enabled && d.allows_role(input.role))
            .collect();

        let mut candidates: Vec<CapabilityScore> = routable
            .iter()
            .map(|d| CapabilityScore {
                capability: d.name.clone(),
                score: self.score(input, d),
                threshold: d.confidence_threshold,
            })
            .filter(|c| c.score > 0.0 && c.score >= c.threshold)
            .collect();
        candidates.sort_by(compare_candidates);

        if !cues.is_empty() {
            let emergency_routable = routable
                .iter()
                .any(|d| d.name == self.emergency_capability);
            let primary = if emergency_routable {
                self.emergency_capability.clone()
            } else {
                candidates
                    .first()
                    .map(|c| c.capability.clone())
                    .unwrap_or_else(|| UNCLASSIFIED.to_string())
            };
            return Ok(IntentResult {
                reasoning: format!("Emergency cues detected: {}", cues.join(", ")),
                primary,
                secondary: Vec::new(),
                urgency: UrgencyLevel::Emergency,
                confidence: 1.0,
                candidates,
                emergency_cues: cues,
            });
        }

        let Some(top) = candidates.first() else {
            return Ok(IntentResult::unclassified(
                "No capability cleared its confidence threshold",
            ));
        };

        let urgency = if has_urgent_cue(&input.text) {
            UrgencyLevel::Urgent
        } else {
            UrgencyLevel::Routine
        };

        Ok(IntentResult {
            primary: top.capability.clone(),
            secondary: candidates[1..]
                .iter()
                .map(|c| c.capability.clone())
                .collect(),
            urgency,
            confidence: top.score,
            reasoning: format!(
                "Matched '{}' with score {:.2} (threshold {:.2})",
                top.capability, top.score, top.threshold
            ),
            candidates,
            emergency_cues: Vec::new(),
        })
    }
}
