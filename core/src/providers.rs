//! Rule-based reference providers.
//!
//! These exist so the service runs end to end without model backends. Their
//! medical content is illustrative; real deployments register their own
//! [`CapabilityProvider`] implementations under the same names.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::capability::{
    AgentResponse, AttachmentKind, CapabilityCategory, CapabilityProvider, ClinicalRequest,
};
use crate::classifier::{emergency_cues, has_urgent_cue, normalize_text};
use crate::error::{ProviderError, RegistryError};
use crate::registry::{AgentDescriptor, AgentRegistry};

fn mentions(normalized: &str, phrase: &str) -> bool {
    format!(" {normalized} ").contains(&format!(" {phrase} "))
}

/// Context value as a list of lowercase strings. Accepts an array or a comma list.
fn context_list(request: &ClinicalRequest, key: &str) -> Vec<String> {
    match request.context_value(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(raw)) => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

// ── Triage ──

const TRIAGE_RED_FLAGS: [&str; 12] = [
    "chest pain",
    "difficulty breathing",
    "shortness of breath",
    "slurred speech",
    "vomiting blood",
    "coughing blood",
    "severe bleeding",
    "confusion",
    "fainting",
    "passed out",
    "stiff neck",
    "severe headache",
];

const TRIAGE_SYMPTOMS: [&str; 14] = [
    "fever",
    "cough",
    "headache",
    "nausea",
    "vomiting",
    "diarrhea",
    "sore throat",
    "rash",
    "dizziness",
    "fatigue",
    "pain",
    "chest pain",
    "shortness of breath",
    "sweating",
];

pub struct TriageProvider;

#[async_trait]
impl CapabilityProvider for TriageProvider {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
        let text = normalize_text(&request.text);
        let symptoms: Vec<&str> = TRIAGE_SYMPTOMS
            .iter()
            .copied()
            .filter(|s| mentions(&text, s))
            .collect();
        let mut red_flags: Vec<String> = TRIAGE_RED_FLAGS
            .iter()
            .filter(|flag| mentions(&text, flag))
            .map(|flag| flag.to_string())
            .collect();
        red_flags.extend(emergency_cues(&text));

        let (level, recommendation, confidence) = if !red_flags.is_empty() {
            (
                "emergency",
                "Seek emergency care now. Call your local emergency number if symptoms are severe or worsening.",
                0.95,
            )
        } else if has_urgent_cue(&text) {
            (
                "urgent",
                "Arrange to be seen by a clinician within 24 hours.",
                0.8,
            )
        } else if !symptoms.is_empty() {
            (
                "routine",
                "Monitor your symptoms and book a routine appointment if they persist beyond a few days.",
                0.7,
            )
        } else {
            (
                "routine",
                "Not enough symptom detail to assess. Describe what you are feeling and for how long.",
                0.4,
            )
        };

        Ok(AgentResponse::ok(
            json!({
                "triage_level": level,
                "symptoms": symptoms,
                "recommendation": recommendation,
            }),
            confidence,
        )
        .with_reasoning(format!(
            "Matched {} symptom(s) and {} red flag(s)",
            symptoms.len(),
            red_flags.len()
        ))
        .with_red_flags(red_flags))
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["symptom_assessment".into(), "urgency_rating".into()]
    }

    fn confidence_threshold(&self) -> f64 {
        0.6
    }
}

pub fn triage_descriptor() -> AgentDescriptor {
    AgentDescriptor::from_provider("triage", CapabilityCategory::General, &TriageProvider)
        .describe("Symptom assessment and urgency rating")
        .triggers([
            ("pain", 0.3),
            ("chest pain", 0.5),
            ("fever", 0.35),
            ("headache", 0.35),
            ("cough", 0.3),
            ("nausea", 0.3),
            ("vomiting", 0.35),
            ("dizziness", 0.3),
            ("dizzy", 0.3),
            ("rash", 0.3),
            ("sore throat", 0.35),
            ("shortness of breath", 0.5),
            ("symptoms", 0.3),
            ("sick", 0.25),
            ("i feel", 0.25),
            ("i have", 0.2),
            ("how serious", 0.4),
            ("should i worry", 0.4),
        ])
}

// ── Diagnostic support ──

const DIFFERENTIALS: [(&[&str], &[&str]); 5] = [
    (
        &["fever", "cough"],
        &["viral upper respiratory infection", "influenza", "early pneumonia"],
    ),
    (&["headache"], &["tension-type headache", "migraine", "dehydration"]),
    (&["sore throat"], &["viral pharyngitis", "streptococcal pharyngitis"]),
    (&["rash"], &["contact dermatitis", "viral exanthem", "allergic reaction"]),
    (
        &["nausea", "diarrhea"],
        &["viral gastroenteritis", "food-borne illness"],
    ),
];

pub struct DiagnosticSupportProvider;

fn parse_age(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl CapabilityProvider for DiagnosticSupportProvider {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
        let age = request
            .context_value("age")
            .and_then(parse_age)
            .ok_or_else(|| ProviderError::Failed("age must be a whole number".to_string()))?;
        let text = normalize_text(&request.text);

        let differential: Vec<&str> = DIFFERENTIALS
            .iter()
            .filter(|(symptoms, _)| symptoms.iter().all(|s| mentions(&text, s)))
            .flat_map(|(_, conditions)| conditions.iter().copied())
            .collect();

        let mut red_flags = Vec::new();
        if age >= 65 && mentions(&text, "fever") {
            red_flags.push("fever in a patient aged 65 or over".to_string());
        }
        if age < 3 && mentions(&text, "fever") {
            red_flags.push("fever in a child under 3".to_string());
        }

        let confidence = if differential.is_empty() { 0.3 } else { 0.6 };
        Ok(AgentResponse::ok(
            json!({
                "possible_conditions": differential,
                "age": age,
                "next_steps": "Discuss these possibilities with a clinician, who can examine you and order tests if needed.",
            }),
            confidence,
        )
        .with_reasoning(format!(
            "{} possible condition(s) matched the described symptoms",
            differential.len()
        ))
        .with_red_flags(red_flags))
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["differential_diagnosis".into()]
    }

    fn confidence_threshold(&self) -> f64 {
        0.5
    }
}

pub fn diagnostic_support_descriptor() -> AgentDescriptor {
    AgentDescriptor::from_provider(
        "diagnostic_support",
        CapabilityCategory::Diagnostic,
        &DiagnosticSupportProvider,
    )
    .describe("Differential diagnosis suggestions for clinician review")
    .triggers([
        ("diagnosis", 0.5),
        ("diagnose", 0.5),
        ("what do i have", 0.6),
        ("could it be", 0.5),
        ("possible conditions", 0.6),
        ("differential", 0.6),
        ("condition", 0.3),
        ("disease", 0.3),
    ])
    .requires("age")
}

// ── Drug information ──

struct DrugEntry {
    name: &'static str,
    aliases: &'static [&'static str],
    class: &'static str,
    side_effects: &'static [&'static str],
    cautions: &'static [&'static str],
}

static DRUGS: [DrugEntry; 6] = [
    DrugEntry {
        name: "aspirin",
        aliases: &["acetylsalicylic acid"],
        class: "NSAID / antiplatelet",
        side_effects: &["stomach upset", "heartburn", "easy bruising"],
        cautions: &["stomach ulcers", "bleeding disorders", "children with viral illness"],
    },
    DrugEntry {
        name: "ibuprofen",
        aliases: &["advil", "motrin"],
        class: "NSAID",
        side_effects: &["stomach upset", "nausea", "headache"],
        cautions: &["kidney disease", "stomach ulcers", "late pregnancy"],
    },
    DrugEntry {
        name: "acetaminophen",
        aliases: &["tylenol", "paracetamol"],
        class: "analgesic / antipyretic",
        side_effects: &["rare at usual doses"],
        cautions: &["liver disease", "regular alcohol use"],
    },
    DrugEntry {
        name: "amoxicillin",
        aliases: &[],
        class: "penicillin antibiotic",
        side_effects: &["diarrhea", "nausea", "rash"],
        cautions: &["penicillin allergy"],
    },
    DrugEntry {
        name: "warfarin",
        aliases: &["coumadin"],
        class: "anticoagulant",
        side_effects: &["bleeding", "bruising"],
        cautions: &["many drug and food interactions"],
    },
    DrugEntry {
        name: "metformin",
        aliases: &[],
        class: "biguanide",
        side_effects: &["nausea", "diarrhea", "metallic taste"],
        cautions: &["kidney disease", "contrast imaging"],
    },
];

/// (drug, drug, severity)
const INTERACTIONS: [(&str, &str, &str); 4] = [
    ("aspirin", "warfarin", "major"),
    ("ibuprofen", "warfarin", "major"),
    ("aspirin", "ibuprofen", "moderate"),
    ("acetaminophen", "warfarin", "minor"),
];

fn interaction(a: &str, b: &str) -> Option<&'static str> {
    INTERACTIONS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, severity)| *severity)
}

fn canonical_drug(raw: &str) -> Option<&'static DrugEntry> {
    let normalized = normalize_text(raw);
    DRUGS
        .iter()
        .find(|d| d.name == normalized || d.aliases.contains(&normalized.as_str()))
}

pub struct DrugInfoProvider;

#[async_trait]
impl CapabilityProvider for DrugInfoProvider {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
        let text = normalize_text(&request.text);
        let mentioned: Vec<&DrugEntry> = DRUGS
            .iter()
            .filter(|d| {
                mentions(&text, d.name) || d.aliases.iter().any(|alias| mentions(&text, alias))
            })
            .collect();

        if mentioned.is_empty() {
            return Ok(AgentResponse::ok(
                json!({ "medications": [], "note": "No known medication was named in the question." }),
                0.4,
            )
            .with_reasoning("No medication matched the reference table"));
        }

        let allergies = context_list(request, "allergies");
        let current: Vec<&DrugEntry> = context_list(request, "medications")
            .iter()
            .filter_map(|m| canonical_drug(m))
            .collect();

        let mut red_flags = Vec::new();
        let mut interactions = Vec::new();
        for drug in &mentioned {
            if allergies.iter().any(|a| a == drug.name || drug.class.contains(a.as_str())) {
                red_flags.push(format!("reported allergy relevant to {}", drug.name));
            }
            for other in current.iter().filter(|o| o.name != drug.name) {
                if let Some(severity) = interaction(drug.name, other.name) {
                    interactions.push(json!({
                        "drugs": [drug.name, other.name],
                        "severity": severity,
                    }));
                    if severity == "major" {
                        red_flags.push(format!(
                            "major interaction: {} with {}",
                            drug.name, other.name
                        ));
                    }
                }
            }
        }

        let medications: Vec<Value> = mentioned
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "class": d.class,
                    "common_side_effects": d.side_effects,
                    "use_with_caution": d.cautions,
                })
            })
            .collect();

        Ok(AgentResponse::ok(
            json!({
                "medications": medications,
                "interactions": interactions,
                "advice": "Check with a pharmacist before combining medicines.",
            }),
            0.9,
        )
        .with_reasoning(format!(
            "Looked up {} medication(s) against {} current medication(s)",
            mentioned.len(),
            current.len()
        ))
        .with_red_flags(red_flags))
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "medication_information".into(),
            "interaction_check".into(),
            "allergy_check".into(),
        ]
    }

    fn confidence_threshold(&self) -> f64 {
        0.7
    }
}

pub fn drug_info_descriptor() -> AgentDescriptor {
    AgentDescriptor::from_provider("drug_info", CapabilityCategory::Medication, &DrugInfoProvider)
        .describe("Medication facts, side effects, interactions and allergy checks")
        .triggers([
            ("medication", 0.4),
            ("medicine", 0.35),
            ("drug", 0.35),
            ("prescription", 0.3),
            ("pill", 0.3),
            ("side effects", 0.5),
            ("side effect", 0.5),
            ("interaction", 0.5),
            ("interactions", 0.5),
            ("dosage", 0.5),
            ("aspirin", 0.4),
            ("ibuprofen", 0.4),
            ("acetaminophen", 0.4),
            ("tylenol", 0.4),
            ("warfarin", 0.4),
            ("metformin", 0.4),
            ("amoxicillin", 0.4),
            ("antibiotic", 0.3),
        ])
}

// ── Image analysis ──

pub struct ImageAnalysisProvider;

fn image_format(reference: &str) -> &'static str {
    match reference.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "dcm" || ext == "dicom" => "dicom",
        Some(ext) if ext == "tif" || ext == "tiff" => "tiff",
        _ => "raster",
    }
}

#[async_trait]
impl CapabilityProvider for ImageAnalysisProvider {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
        let images: Vec<&str> = request.attachments_of(AttachmentKind::Image).collect();
        if images.is_empty() {
            return Ok(AgentResponse::degraded(
                "no image attachment was supplied; attach the image to be reviewed",
            ));
        }

        let reviewed: Vec<Value> = images
            .iter()
            .map(|reference| {
                json!({
                    "reference": reference,
                    "format": image_format(reference),
                    "status": "queued_for_radiologist",
                })
            })
            .collect();

        Ok(AgentResponse::ok(
            json!({
                "images": reviewed,
                "findings": "Automated pre-screening only. No findings are reported without radiologist review.",
            }),
            0.5,
        )
        .with_reasoning(format!("{} image(s) accepted for review", images.len())))
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["image_prescreening".into()]
    }

    fn confidence_threshold(&self) -> f64 {
        0.5
    }
}

pub fn image_analysis_descriptor() -> AgentDescriptor {
    AgentDescriptor::from_provider(
        "image_analysis",
        CapabilityCategory::ImageAnalysis,
        &ImageAnalysisProvider,
    )
    .describe("Pre-screening of medical images ahead of radiologist review")
    .triggers([
        ("xray", 0.5),
        ("x ray", 0.5),
        ("scan", 0.4),
        ("mri", 0.5),
        ("ct", 0.4),
        ("ultrasound", 0.5),
        ("imaging", 0.4),
        ("image", 0.3),
    ])
    .attachment_affinity(AttachmentKind::Image)
}

// ── Voice ──

pub struct VoiceProvider;

#[async_trait]
impl CapabilityProvider for VoiceProvider {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
        let recordings: Vec<&str> = request.attachments_of(AttachmentKind::Audio).collect();
        if recordings.is_empty() {
            return Ok(AgentResponse::degraded(
                "no audio attachment was supplied; attach the recording to transcribe",
            ));
        }
        Ok(AgentResponse::ok(
            json!({
                "recordings": recordings,
                "transcript": Value::Null,
                "status": "transcription_pending",
            }),
            0.5,
        )
        .with_reasoning("Recordings accepted; transcription runs asynchronously"))
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["transcription".into()]
    }

    fn confidence_threshold(&self) -> f64 {
        0.5
    }
}

pub fn voice_descriptor() -> AgentDescriptor {
    AgentDescriptor::from_provider("voice", CapabilityCategory::Voice, &VoiceProvider)
        .describe("Clinical speech transcription")
        .triggers([
            ("transcribe", 0.6),
            ("transcription", 0.6),
            ("dictate", 0.5),
            ("recording", 0.4),
            ("audio", 0.4),
            ("voice", 0.3),
        ])
        .attachment_affinity(AttachmentKind::Audio)
}

// ── Communication ──

const GLOSSARY: [(&str, &str); 8] = [
    ("hypertension", "blood pressure that stays higher than normal over time"),
    ("tachycardia", "a heart rate faster than normal while at rest"),
    ("bradycardia", "a heart rate slower than normal while at rest"),
    ("edema", "swelling caused by fluid building up in the body's tissues"),
    ("benign", "not cancerous and not spreading to other parts of the body"),
    ("hyperglycemia", "more sugar in the blood than normal"),
    ("dyspnea", "the feeling of being short of breath"),
    ("myocardial infarction", "a heart attack, where blood flow to part of the heart is blocked"),
];

pub struct CommunicationProvider;

#[async_trait]
impl CapabilityProvider for CommunicationProvider {
    async fn process(&self, request: &ClinicalRequest) -> Result<AgentResponse, ProviderError> {
        let text = normalize_text(&request.text);
        let explanations: Vec<Value> = GLOSSARY
            .iter()
            .filter(|(term, _)| mentions(&text, term))
            .map(|(term, plain)| json!({ "term": term, "plain_language": plain }))
            .collect();

        let confidence = if explanations.is_empty() { 0.4 } else { 0.85 };
        Ok(AgentResponse::ok(
            json!({
                "explanations": explanations,
                "follow_up": "Ask your care team if anything in your records is still unclear.",
            }),
            confidence,
        )
        .with_reasoning(format!("{} term(s) explained", explanations.len())))
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["plain_language_explanation".into()]
    }

    fn confidence_threshold(&self) -> f64 {
        0.6
    }
}

pub fn communication_descriptor() -> AgentDescriptor {
    AgentDescriptor::from_provider(
        "communication",
        CapabilityCategory::General,
        &CommunicationProvider,
    )
    .describe("Plain-language explanations of medical terms")
    .triggers([
        ("explain", 0.6),
        ("what is", 0.35),
        ("what does", 0.35),
        ("mean", 0.3),
        ("means", 0.3),
        ("in simple terms", 0.5),
        ("tell me about", 0.4),
        ("definition", 0.5),
    ])
}

/// Every reference descriptor paired with its handler.
pub fn reference_catalog() -> Vec<(AgentDescriptor, Arc<dyn CapabilityProvider>)> {
    let catalog: [(AgentDescriptor, Arc<dyn CapabilityProvider>); 6] = [
        (triage_descriptor(), Arc::new(TriageProvider)),
        (diagnostic_support_descriptor(), Arc::new(DiagnosticSupportProvider)),
        (drug_info_descriptor(), Arc::new(DrugInfoProvider)),
        (image_analysis_descriptor(), Arc::new(ImageAnalysisProvider)),
        (voice_descriptor(), Arc::new(VoiceProvider)),
        (communication_descriptor(), Arc::new(CommunicationProvider)),
    ];
    catalog.into()
}

/// One-time population step run at startup.
pub fn register_reference_providers(registry: &AgentRegistry) -> Result<(), RegistryError> {
    for (descriptor, handler) in reference_catalog() {
        registry.register(descriptor, handler)?;
    }
    Ok(())
}
