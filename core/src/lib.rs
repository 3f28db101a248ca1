//! Orchestration core for clinical capability routing.
//!
//! A request flows through the [`classifier`], is dispatched to the providers held
//! by the [`registry`], has every response post-processed by the [`safety`] wrapper,
//! and leaves one [`audit`] record per invoked capability before the caller sees it.

pub mod audit;
pub mod capability;
pub mod classifier;
pub mod config;
pub mod error;
pub mod escalation;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod safety;

pub use capability::{
    AgentResponse, AttachmentKind, CapabilityCategory, CapabilityProvider, ClinicalRequest,
    UrgencyLevel, UserRole,
};
pub use orchestrator::{AggregatedResponse, Orchestrator};
pub use registry::{AgentDescriptor, AgentRegistry};
