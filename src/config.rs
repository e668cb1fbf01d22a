//! Engine configuration.

use std::time::Duration;

/// Tunables for a triage engine instance.
///
/// Keyword tables and id patterns live with their components
/// ([`crate::triage::classifier::ClassifierConfig`],
/// [`crate::extract::ExtractorConfig`]); this struct holds the
/// session-level knobs.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Maximum tool-call steps per session before the loop is forced to
    /// finalize.
    pub max_tool_steps: usize,
    /// How many citations a retrieval tool call may return.
    pub top_k: usize,
    /// Require at least one citation when composing an incident reply.
    pub strict_citation_for_incident: bool,
    /// Retries for a failed generation call before the session aborts.
    pub generation_retries: u32,
    /// Per-call timeout for the generation capability.
    pub generation_timeout: Duration,
    /// Per-call timeout for a retrieval query (retried once, then treated
    /// as an empty result).
    pub retrieval_timeout: Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            max_tool_steps: 5,
            top_k: 3,
            strict_citation_for_incident: false,
            generation_retries: 1,
            generation_timeout: Duration::from_secs(30),
            retrieval_timeout: Duration::from_secs(2),
        }
    }
}

impl TriageConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    ///
    /// Recognized: `TRIAGE_MAX_TOOL_STEPS`, `TRIAGE_TOP_K`,
    /// `TRIAGE_STRICT_INCIDENT`, `TRIAGE_GENERATION_RETRIES`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn parse_var<T: std::str::FromStr>(name: &str, fallback: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        }

        Self {
            max_tool_steps: parse_var("TRIAGE_MAX_TOOL_STEPS", defaults.max_tool_steps),
            top_k: parse_var("TRIAGE_TOP_K", defaults.top_k),
            strict_citation_for_incident: parse_var(
                "TRIAGE_STRICT_INCIDENT",
                defaults.strict_citation_for_incident,
            ),
            generation_retries: parse_var(
                "TRIAGE_GENERATION_RETRIES",
                defaults.generation_retries,
            ),
            ..defaults
        }
    }
}
