use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ProviderError;

/// Declared role of whoever submitted the request.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Patient,
    Clinician,
    Admin,
}

/// Time sensitivity of a request. Ordered: routine < urgent < emergency.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    #[default]
    Routine,
    Urgent,
    Emergency,
}

impl UrgencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }
}

/// Category used to pick the disclaimer attached to a capability's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    Diagnostic,
    ImageAnalysis,
    Medication,
    Emergency,
    Voice,
    General,
}

impl CapabilityCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diagnostic => "diagnostic",
            Self::ImageAnalysis => "image_analysis",
            Self::Medication => "medication",
            Self::Emergency => "emergency",
            Self::Voice => "voice",
            Self::General => "general",
        }
    }
}

/// Coarse media type of an attachment reference, inferred from its extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
    Document,
}

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "dcm", "dicom", "tif", "tiff"];
const AUDIO_EXTENSIONS: [&str; 6] = ["wav", "mp3", "m4a", "ogg", "flac", "webm"];

impl AttachmentKind {
    pub fn from_reference(reference: &str) -> Self {
        let extension = reference
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Self::Image
        } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            Self::Audio
        } else {
            Self::Document
        }
    }
}

/// A clinical request as submitted by the caller. Read-only once accepted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClinicalRequest {
    /// Caller-supplied user identifier (never persisted in clear)
    pub user_id: String,
    /// Raw request text
    #[serde(alias = "message")]
    pub text: String,
    /// Attachment references (file names or storage keys)
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Declared key/value context (age, allergies, session id, ...)
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// Declared role of the submitter
    #[serde(default)]
    pub role: UserRole,
}

impl ClinicalRequest {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            attachments: Vec::new(),
            context: BTreeMap::new(),
            role: UserRole::default(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_attachment(mut self, reference: impl Into<String>) -> Self {
        self.attachments.push(reference.into());
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    /// Context value for `key`, treating explicit nulls and blank strings as absent.
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        match self.context.get(key) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => Some(value),
        }
    }

    pub fn attachments_of(&self, kind: AttachmentKind) -> impl Iterator<Item = &str> {
        self.attachments
            .iter()
            .map(String::as_str)
            .filter(move |reference| AttachmentKind::from_reference(reference) == kind)
    }
}

/// Output of a capability provider. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentResponse {
    pub success: bool,
    /// Structured payload. Shape is owned by the provider.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Provider-reported confidence; normalized to [0,1] downstream
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

impl AgentResponse {
    pub fn ok(data: serde_json::Value, confidence: f64) -> Self {
        Self {
            success: true,
            data,
            confidence,
            reasoning: None,
            red_flags: Vec::new(),
        }
    }

    /// Response standing in for a provider that raised, panicked or refused the input.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::json!({ "error": message.into() }),
            confidence: 0.0,
            reasoning: None,
            red_flags: Vec::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_red_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.red_flags.extend(flags.into_iter().map(Into::into));
        self
    }
}

/// Clamp a confidence value to [0,1]; non-finite values become 0.
pub fn normalize_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Contract implemented by every capability provider, rule-based or model-backed.
///
/// Providers own their own retry policy; the orchestrator calls `process` exactly
/// once per request and abandons the call when its timeout elapses.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError>;

    /// Capability keywords this provider handles.
    fn capabilities(&self) -> Vec<String>;

    /// Minimum confidence at which output is shown without a review note.
    fn confidence_threshold(&self) -> f64 {
        0.20
    }
}
