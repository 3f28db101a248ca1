use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::capability::{AttachmentKind, CapabilityCategory, CapabilityProvider, UserRole};
use crate::classifier::normalize_text;
use crate::error::RegistryError;

/// One weighted trigger phrase in a capability's lexicon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TriggerPhrase {
    pub phrase: String,
    pub weight: f64,
}

/// Catalog entry for a capability. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentDescriptor {
    /// Unique capability name (e.g. "triage", "drug_info")
    pub name: String,
    pub description: String,
    /// Disclaimer category for this capability's output
    pub category: CapabilityCategory,
    /// Capability keywords advertised by the provider
    pub capabilities: Vec<String>,
    /// Minimum classifier score to route here, and minimum output confidence
    /// before a review note is attached
    pub confidence_threshold: f64,
    pub enabled: bool,
    /// Weighted lexicon scored by the keyword classifier
    pub triggers: Vec<TriggerPhrase>,
    /// Context keys that must be present before the handler is invoked
    pub required_context: Vec<String>,
    /// Attachment kind that makes this capability more likely
    pub attachment_affinity: Option<AttachmentKind>,
    /// Roles allowed to reach this capability. Empty means every role.
    pub roles: Vec<UserRole>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, category: CapabilityCategory) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            capabilities: Vec::new(),
            confidence_threshold: 0.20,
            enabled: true,
            triggers: Vec::new(),
            required_context: Vec::new(),
            attachment_affinity: None,
            roles: Vec::new(),
        }
    }

    /// Descriptor seeded with the provider's own capabilities and threshold.
    pub fn from_provider(
        name: impl Into<String>,
        category: CapabilityCategory,
        provider: &dyn CapabilityProvider,
    ) -> Self {
        let mut descriptor = Self::new(name, category);
        descriptor.capabilities = provider.capabilities();
        descriptor.confidence_threshold = provider.confidence_threshold();
        descriptor
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn trigger(mut self, phrase: impl Into<String>, weight: f64) -> Self {
        self.triggers.push(TriggerPhrase {
            phrase: phrase.into(),
            weight,
        });
        self
    }

    pub fn triggers<'a>(mut self, phrases: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        for (phrase, weight) in phrases {
            self = self.trigger(phrase, weight);
        }
        self
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.required_context.push(key.into());
        self
    }

    pub fn attachment_affinity(mut self, kind: AttachmentKind) -> Self {
        self.attachment_affinity = Some(kind);
        self
    }

    pub fn restricted_to(mut self, roles: impl IntoIterator<Item = UserRole>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn allows_role(&self, role: UserRole) -> bool {
        self.roles.is_empty() || self.roles.contains(&role)
    }

    fn validated(mut self) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        let name_ok = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !name_ok {
            return Err(invalid("name must be non-empty snake_case ascii"));
        }
        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(invalid("confidence_threshold must be within [0, 1]"));
        }
        if self
            .triggers
            .iter()
            .any(|t| !t.weight.is_finite() || t.weight <= 0.0 || t.weight > 1.0)
        {
            return Err(invalid("trigger weights must be within (0, 1]"));
        }

        // Phrases are matched against normalized request text, so store them normalized.
        let mut triggers: Vec<TriggerPhrase> = Vec::with_capacity(self.triggers.len());
        for trigger in self.triggers.drain(..) {
            let phrase = normalize_text(&trigger.phrase);
            if phrase.is_empty() || triggers.iter().any(|t| t.phrase == phrase) {
                continue;
            }
            triggers.push(TriggerPhrase {
                phrase,
                weight: trigger.weight,
            });
        }
        self.triggers = triggers;
        self.required_context.sort();
        self.required_context.dedup();
        Ok(self)
    }
}

/// Public listing entry for `listCapabilities()`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    pub category: CapabilityCategory,
    pub capabilities: Vec<String>,
    pub threshold: f64,
    pub enabled: bool,
}

impl From<&AgentDescriptor> for CapabilityInfo {
    fn from(descriptor: &AgentDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            category: descriptor.category,
            capabilities: descriptor.capabilities.clone(),
            threshold: descriptor.confidence_threshold,
            enabled: descriptor.enabled,
        }
    }
}

/// A registered descriptor together with its handler.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub descriptor: Arc<AgentDescriptor>,
    pub handler: Arc<dyn CapabilityProvider>,
}

impl RegisteredAgent {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn threshold(&self) -> f64 {
        self.descriptor.confidence_threshold
    }
}

/// Catalog of capability providers.
///
/// Populated once at startup, read-mostly afterwards. Each entry is inserted
/// under a single write lock, so readers never see a partially registered entry.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        descriptor: AgentDescriptor,
        handler: Arc<dyn CapabilityProvider>,
    ) -> Result<(), RegistryError> {
        let descriptor = descriptor.validated()?;
        let name = descriptor.name.clone();

        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        if agents.contains_key(&name) {
            return Err(RegistryError::DuplicateCapability(name));
        }
        tracing::info!(
            capability = %name,
            threshold = descriptor.confidence_threshold,
            enabled = descriptor.enabled,
            "Registered capability"
        );
        agents.insert(
            name,
            RegisteredAgent {
                descriptor: Arc::new(descriptor),
                handler,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<RegisteredAgent, RegistryError> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Snapshot of every descriptor, ordered by name.
    pub fn list_all(&self) -> Vec<Arc<AgentDescriptor>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|agent| agent.descriptor.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enabled_count(&self) -> usize {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|agent| agent.descriptor.enabled)
            .count()
    }
}
