//! Orchestration state machine for one triage session.
//!
//! Drives `START → REASON → (TOOL_CALL → REASON)* → FINALIZE → DONE`,
//! with `ABORTED` reachable from any state. Termination is guaranteed
//! regardless of generation-capability behavior: the tool-step counter is
//! hard-capped, identical consecutive tool calls are cut off, and
//! generation failures abort after bounded retries. Tool-level problems
//! are absorbed as degraded results — only the generation capability,
//! cycle detection, and cancellation can abort a session.

pub mod tools;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::TriageConfig;
use crate::error::GenerationError;
use crate::extract::{EntityKind, Extractor};
use crate::llm::{
    GenerationProvider, GenerationRequest, GenerationResponse, ToolCallRequest, ToolExchange,
};
use crate::retrieval::SearchIndex;
use crate::triage::types::{Citation, Classification, Email, EvidenceSet};
use self::tools::ToolRequest;

/// Cooperative cancellation flag, checked at step boundaries only —
/// never mid-step, and never once the session is finalizing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Session states, for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Reason,
    ToolCall,
    Finalize,
    Done,
    Aborted,
}

/// Why a session aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Generation retries exhausted, or the capability violated the
    /// finalize contract.
    GenerationFailed(String),
    /// The same tool call was requested three times in a row.
    ToolCycle(String),
    /// The session was cancelled between steps.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerationFailed(reason) => write!(f, "generation failed: {reason}"),
            Self::ToolCycle(tool) => write!(f, "tool cycle detected on {tool}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of the orchestration loop. Aborted sessions keep their partial
/// evidence for diagnostics.
#[derive(Debug)]
pub struct SessionOutcome {
    pub evidence: EvidenceSet,
    /// Final answer text; `None` when the session aborted.
    pub answer: Option<String>,
    /// Tool-call steps consumed. Never exceeds `max_tool_steps`.
    pub tool_steps: usize,
    pub abort: Option<AbortReason>,
}

fn aborted(evidence: EvidenceSet, tool_steps: usize, reason: AbortReason) -> SessionOutcome {
    SessionOutcome {
        evidence,
        answer: None,
        tool_steps,
        abort: Some(reason),
    }
}

/// The bounded reasoning/tool loop around the generation capability.
pub struct Orchestrator {
    provider: Arc<dyn GenerationProvider>,
    extractor: Arc<Extractor>,
    config: TriageConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        extractor: Arc<Extractor>,
        config: TriageConfig,
    ) -> Self {
        Self {
            provider,
            extractor,
            config,
        }
    }

    /// Run one session to completion.
    ///
    /// `index` is the handle captured at session start; `None` degrades
    /// retrieval to empty results rather than failing the session.
    pub async fn run(
        &self,
        email: &Email,
        classification: &Classification,
        index: Option<Arc<SearchIndex>>,
        cancel: &CancelToken,
    ) -> SessionOutcome {
        let mut evidence = EvidenceSet::new();
        let mut transcript: Vec<ToolExchange> = Vec::new();
        let mut tool_steps = 0usize;
        let mut state = SessionState::Start;

        // Cycle detection over consecutive identical tool calls.
        let mut last_call: Option<ToolCallRequest> = None;
        let mut repeat_count = 0usize;

        debug!(provider = self.provider.name(), "Session started");

        loop {
            let finalizing = tool_steps >= self.config.max_tool_steps;
            if finalizing && state != SessionState::Finalize {
                debug!(tool_steps, "Tool budget exhausted, forcing finalize");
                state = SessionState::Finalize;
            }

            // Cancellation is cooperative and has no effect once the
            // session is finalizing.
            if state != SessionState::Finalize && cancel.is_cancelled() {
                info!("Session cancelled between steps");
                return aborted(evidence, tool_steps, AbortReason::Cancelled);
            }
            if state == SessionState::Start {
                state = SessionState::Reason;
            }

            let request = GenerationRequest {
                email: email.clone(),
                classification: classification.clone(),
                evidence: evidence.citations().to_vec(),
                transcript: transcript.clone(),
                allow_tools: !finalizing,
            };

            let response = match self.generate_with_retry(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Generation failed, aborting session");
                    return aborted(
                        evidence,
                        tool_steps,
                        AbortReason::GenerationFailed(e.to_string()),
                    );
                }
            };

            match response {
                GenerationResponse::Final { text } => {
                    state = SessionState::Done;
                    info!(?state, tool_steps, citations = evidence.len(), "Session done");
                    return SessionOutcome {
                        evidence,
                        answer: Some(text),
                        tool_steps,
                        abort: None,
                    };
                }
                GenerationResponse::Tool { call } if !finalizing => {
                    if last_call.as_ref() == Some(&call) {
                        repeat_count += 1;
                    } else {
                        repeat_count = 1;
                        last_call = Some(call.clone());
                    }
                    if repeat_count >= 3 {
                        warn!(tool = %call.name, "Identical tool call repeated, aborting");
                        return aborted(evidence, tool_steps, AbortReason::ToolCycle(call.name));
                    }

                    state = SessionState::ToolCall;
                    tool_steps += 1;
                    let result = self
                        .dispatch(&call, email, index.as_ref(), &mut evidence)
                        .await;
                    debug!(?state, tool = %call.name, step = tool_steps, result = %result, "Tool call");
                    transcript.push(ToolExchange { call, result });
                    state = SessionState::Reason;
                }
                GenerationResponse::Tool { call } => {
                    // FINALIZE honors no further tool requests.
                    warn!(tool = %call.name, "Tool requested during finalize, aborting");
                    return aborted(
                        evidence,
                        tool_steps,
                        AbortReason::GenerationFailed(
                            "tool requested after tool budget was exhausted".into(),
                        ),
                    );
                }
            }
        }
    }

    /// One generation call with the per-call timeout, retrying timeouts
    /// and unavailability up to the configured retry count.
    async fn generate_with_retry(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let mut attempt = 0u32;
        loop {
            let call = self.provider.generate(request.clone());
            let result = match timeout(self.config.generation_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout {
                    timeout: self.config.generation_timeout,
                }),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e @ (GenerationError::Timeout { .. } | GenerationError::Unavailable { .. }))
                    if attempt < self.config.generation_retries =>
                {
                    attempt += 1;
                    warn!(error = %e, attempt, "Generation call failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one tool call. Tool-level failures are absorbed into the
    /// returned summary; they never abort the session.
    async fn dispatch(
        &self,
        call: &ToolCallRequest,
        email: &Email,
        index: Option<&Arc<SearchIndex>>,
        evidence: &mut EvidenceSet,
    ) -> String {
        let parsed = match ToolRequest::parse(call) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(tool = %call.name, reason = %reason, "Unusable tool request");
                return format!("tool error: {reason}");
            }
        };

        match parsed {
            ToolRequest::Extract { text, kinds } => {
                let scan_text = text.unwrap_or_else(|| email.text());
                let kinds = if kinds.is_empty() {
                    vec![EntityKind::Email, EntityKind::Url, EntityKind::Id]
                } else {
                    kinds
                };
                let extracted = self.extractor.extract(&scan_text, &kinds);
                serde_json::to_string(&extracted).unwrap_or_else(|_| "{}".into())
            }
            ToolRequest::Retrieve { query, top_k } => {
                let Some(index) = index else {
                    warn!("Retrieval requested but no index is installed");
                    return "retrieval unavailable: index not ready".into();
                };
                let k = top_k
                    .unwrap_or(self.config.top_k)
                    .min(self.config.top_k);
                let citations = self.query_with_retry(index, &query, k).await;
                let found = citations.len();
                let added = evidence.extend(citations);
                format!("retrieved {found} citations ({added} new)")
            }
        }
    }

    /// Retrieval with its own timeout: one retry, then an empty result.
    ///
    /// The query runs on the blocking pool so the timeout can actually
    /// fire on a degenerate corpus.
    async fn query_with_retry(
        &self,
        index: &Arc<SearchIndex>,
        query: &str,
        top_k: usize,
    ) -> Vec<Citation> {
        for attempt in 0..2 {
            let index = Arc::clone(index);
            let query = query.to_string();
            let task = tokio::task::spawn_blocking(move || index.query(&query, top_k));
            match timeout(self.config.retrieval_timeout, task).await {
                Ok(Ok(citations)) => return citations,
                Ok(Err(e)) => {
                    warn!(error = %e, "Retrieval task failed, treating as empty");
                    return Vec::new();
                }
                Err(_) => {
                    let err = crate::error::RetrievalError::Timeout {
                        timeout: self.config.retrieval_timeout,
                    };
                    warn!(attempt, error = %err, "Retrieval query timed out");
                }
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::KnowledgeDocument;
    use crate::triage::types::{Category, Urgency};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Provider scripted by a closure over (request, call index).
    struct FnProvider<F> {
        f: F,
        calls: AtomicUsize,
    }

    impl<F> FnProvider<F>
    where
        F: Fn(&GenerationRequest, usize) -> Result<GenerationResponse, GenerationError>
            + Send
            + Sync,
    {
        fn new(f: F) -> Self {
            Self {
                f,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl<F> GenerationProvider for FnProvider<F>
    where
        F: Fn(&GenerationRequest, usize) -> Result<GenerationResponse, GenerationError>
            + Send
            + Sync,
    {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.f)(&request, n)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn final_answer(text: &str) -> Result<GenerationResponse, GenerationError> {
        Ok(GenerationResponse::Final { text: text.into() })
    }

    fn tool(name: &str, arguments: serde_json::Value) -> Result<GenerationResponse, GenerationError> {
        Ok(GenerationResponse::Tool {
            call: ToolCallRequest {
                name: name.into(),
                arguments,
            },
        })
    }

    fn sample_email() -> Email {
        let extractor = Extractor::with_defaults();
        let body = "Erreur 502 sur login, voir logs auth-gateway";
        Email {
            sender: "alice@client.example".into(),
            subject: "Connexion impossible".into(),
            body: body.into(),
            received_at: Utc::now(),
            entities: extractor.entities(body),
        }
    }

    fn sample_classification() -> Classification {
        Classification {
            category: Category::Incident,
            urgency: Urgency::Medium,
            rationale: "test".into(),
        }
    }

    fn sample_index() -> Arc<SearchIndex> {
        Arc::new(SearchIndex::build(vec![KnowledgeDocument::parse(
            "incident_502",
            "# Erreur 502 Bad Gateway\n\n\
             Une erreur 502 indique que le reverse proxy ne reçoit pas de \
             réponse du service amont.\n\n\
             ## Procédure de diagnostic\n\n\
             1. Vérifier l'état du reverse proxy.\n\
             2. Consulter les logs de l'auth-gateway.\n",
        )]))
    }

    fn orchestrator<F>(provider: FnProvider<F>) -> Orchestrator
    where
        F: Fn(&GenerationRequest, usize) -> Result<GenerationResponse, GenerationError>
            + Send
            + Sync
            + 'static,
    {
        Orchestrator::new(
            Arc::new(provider),
            Arc::new(Extractor::with_defaults()),
            TriageConfig::default(),
        )
    }

    #[tokio::test]
    async fn immediate_final_answer_uses_zero_tools() {
        let orch = orchestrator(FnProvider::new(|_, _| final_answer("Bonjour, tout va bien.")));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert_eq!(outcome.tool_steps, 0);
        assert!(outcome.evidence.is_empty());
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.answer.as_deref(), Some("Bonjour, tout va bien."));
    }

    #[tokio::test]
    async fn retrieval_tool_accumulates_evidence() {
        let orch = orchestrator(FnProvider::new(|request, n| {
            if n == 0 {
                tool("retrieve", json!({ "query": "502 reverse proxy" }))
            } else {
                assert!(!request.evidence.is_empty());
                final_answer("Voici la procédure.")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert_eq!(outcome.tool_steps, 1);
        assert!(!outcome.evidence.is_empty());
        assert!(outcome.abort.is_none());
    }

    #[tokio::test]
    async fn always_tool_provider_is_forced_to_finalize() {
        // Varying arguments defeat cycle detection; the step cap must
        // still force a finalize, and the provider answers when tools are
        // disallowed.
        let orch = orchestrator(FnProvider::new(|request, n| {
            if request.allow_tools {
                tool("retrieve", json!({ "query": format!("requete {n}") }))
            } else {
                final_answer("Réponse finale forcée.")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert_eq!(outcome.tool_steps, TriageConfig::default().max_tool_steps);
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.answer.as_deref(), Some("Réponse finale forcée."));
    }

    #[tokio::test]
    async fn reasoning_steps_are_bounded_even_for_defiant_provider() {
        // A provider that always requests a tool, even while finalizing,
        // aborts after max_tool_steps + 1 reasoning steps.
        let provider = FnProvider::new(|_, n| {
            tool("retrieve", json!({ "query": format!("requete {n}") }))
        });
        let max_steps = TriageConfig::default().max_tool_steps;
        let orch = orchestrator(provider);
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert!(matches!(
            outcome.abort,
            Some(AbortReason::GenerationFailed(_))
        ));
        assert_eq!(outcome.tool_steps, max_steps);
    }

    #[tokio::test]
    async fn identical_tool_calls_three_times_abort_with_partial_evidence() {
        // The query matches a single section, so the deduplicated partial
        // evidence stays at one citation.
        let orch = orchestrator(FnProvider::new(|_, _| {
            tool("retrieve", json!({ "query": "consulter les logs" }))
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert!(matches!(outcome.abort, Some(AbortReason::ToolCycle(ref t)) if t == "retrieve"));
        // Two identical calls executed before the third aborts; dedup
        // keeps the evidence at one citation per section.
        assert!(outcome.evidence.len() <= 1);
        assert!(outcome.answer.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_absorbed_and_counts_a_step() {
        let orch = orchestrator(FnProvider::new(|_, n| {
            if n == 0 {
                tool("shell", json!({ "command": "rm -rf /" }))
            } else {
                final_answer("On continue sans l'outil inconnu.")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert_eq!(outcome.tool_steps, 1);
        assert!(outcome.abort.is_none());
    }

    #[tokio::test]
    async fn extract_tool_returns_entities() {
        let orch = orchestrator(FnProvider::new(|request, n| {
            if n == 0 {
                tool("extract", json!({ "kinds": ["id"] }))
            } else {
                let exchange = &request.transcript[0];
                assert!(exchange.result.contains("502"));
                final_answer("ok")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                None,
                &CancelToken::new(),
            )
            .await;
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.tool_steps, 1);
    }

    #[tokio::test]
    async fn missing_index_degrades_retrieval_instead_of_failing() {
        let orch = orchestrator(FnProvider::new(|_, n| {
            if n == 0 {
                tool("retrieve", json!({ "query": "502" }))
            } else {
                final_answer("Réponse sans sources.")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                None,
                &CancelToken::new(),
            )
            .await;
        assert!(outcome.abort.is_none());
        assert!(outcome.evidence.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_retries_then_aborts() {
        let orch = orchestrator(FnProvider::new(|_, _| {
            Err(GenerationError::Unavailable {
                reason: "backend down".into(),
            })
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert!(matches!(
            outcome.abort,
            Some(AbortReason::GenerationFailed(_))
        ));
        assert!(outcome.answer.is_none());
    }

    #[tokio::test]
    async fn transient_generation_failure_recovers_within_retry_budget() {
        let orch = orchestrator(FnProvider::new(|_, n| {
            if n == 0 {
                Err(GenerationError::Unavailable {
                    reason: "blip".into(),
                })
            } else {
                final_answer("Rétabli.")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.answer.as_deref(), Some("Rétabli."));
    }

    #[tokio::test]
    async fn cancellation_aborts_between_steps() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let orch = orchestrator(FnProvider::new(|_, _| final_answer("jamais atteint")));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &cancel,
            )
            .await;
        assert!(matches!(outcome.abort, Some(AbortReason::Cancelled)));
    }

    #[tokio::test]
    async fn duplicate_citations_are_not_reaccumulated() {
        // Two different queries hitting the same sections must not grow
        // the evidence set twice.
        let orch = orchestrator(FnProvider::new(|_, n| match n {
            0 => tool("retrieve", json!({ "query": "502 reverse proxy" })),
            1 => tool("retrieve", json!({ "query": "reverse proxy 502 logs" })),
            _ => final_answer("fin"),
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert!(outcome.abort.is_none());
        let keys: Vec<_> = outcome
            .evidence
            .citations()
            .iter()
            .map(|c| (c.document_id.clone(), c.section_heading.clone()))
            .collect();
        let unique: std::collections::HashSet<_> = keys.iter().cloned().collect();
        assert_eq!(keys.len(), unique.len());
    }

    #[tokio::test]
    async fn requested_top_k_is_capped_by_config() {
        let orch = orchestrator(FnProvider::new(|request, n| {
            if n == 0 {
                tool("retrieve", json!({ "query": "502 reverse proxy", "top_k": 50 }))
            } else {
                assert!(request.evidence.len() <= TriageConfig::default().top_k);
                final_answer("ok")
            }
        }));
        let outcome = orch
            .run(
                &sample_email(),
                &sample_classification(),
                Some(sample_index()),
                &CancelToken::new(),
            )
            .await;
        assert!(outcome.abort.is_none());
    }
}
