use std::time::Duration;

pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_DEADLINE_MS: u64 = 8_000;
pub const DEFAULT_EMERGENCY_CAPABILITY: &str = "triage";

/// Orchestrator knobs. Transport settings (port, CORS, database) live in the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Bound on a single capability call
    pub per_call_timeout: Duration,
    /// Bound on the whole dispatch phase of one request
    pub request_deadline: Duration,
    /// Capability that receives requests carrying emergency cues
    pub emergency_capability: String,
    /// Context keys redacted in addition to the built-in identifier list
    pub identifier_fields: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            request_deadline: Duration::from_millis(DEFAULT_REQUEST_DEADLINE_MS),
            emergency_capability: DEFAULT_EMERGENCY_CAPABILITY.to_string(),
            identifier_fields: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Read `MEDROUTE_*` variables, falling back to defaults for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let per_call_timeout =
            Duration::from_millis(millis("MEDROUTE_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS));
        let request_deadline = Duration::from_millis(millis(
            "MEDROUTE_REQUEST_DEADLINE_MS",
            DEFAULT_REQUEST_DEADLINE_MS,
        ));

        let emergency_capability = lookup("MEDROUTE_EMERGENCY_CAPABILITY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_EMERGENCY_CAPABILITY.to_string());

        let identifier_fields = lookup("MEDROUTE_IDENTIFIER_FIELDS")
            .map(|raw| {
                raw.split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if request_deadline < per_call_timeout {
            tracing::warn!(
                per_call_timeout_ms = per_call_timeout.as_millis() as u64,
                request_deadline_ms = request_deadline.as_millis() as u64,
                "request deadline is shorter than the per-call timeout; the deadline wins"
            );
        }

        Self {
            per_call_timeout,
            request_deadline,
            emergency_capability,
            identifier_fields,
        }
    }

    pub fn with_timeouts(mut self, per_call_timeout: Duration, request_deadline: Duration) -> Self {
        self.per_call_timeout = per_call_timeout;
        self.request_deadline = request_deadline;
        self
    }
}
