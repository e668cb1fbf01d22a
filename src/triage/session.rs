//! Triage engine — runs one email through the full pipeline.
//!
//! Flow: classify (deterministic) → orchestrator loop (bounded, may call
//! tools) → compose (deterministic). An aborted orchestration still
//! produces a `TriageResult` with the partial evidence and an explicit
//! aborted marker.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::compose::Composer;
use crate::config::TriageConfig;
use crate::error::Result;
use crate::extract::Extractor;
use crate::llm::GenerationProvider;
use crate::orchestrate::{CancelToken, Orchestrator};
use crate::retrieval::IndexSlot;
use crate::triage::classifier::Classifier;
use crate::triage::types::{Email, TriageResult};

/// The pipeline façade. One engine serves many concurrent sessions; the
/// only shared mutable state is the swappable index slot.
pub struct TriageEngine {
    classifier: Classifier,
    orchestrator: Orchestrator,
    composer: Composer,
    index: Arc<IndexSlot>,
}

impl TriageEngine {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        extractor: Arc<Extractor>,
        classifier: Classifier,
        index: Arc<IndexSlot>,
        config: TriageConfig,
    ) -> Self {
        Self {
            classifier,
            composer: Composer::new(config.strict_citation_for_incident),
            orchestrator: Orchestrator::new(provider, extractor, config),
            index,
        }
    }

    /// Process one email end to end.
    pub async fn triage(&self, email: Email, cancel: &CancelToken) -> Result<TriageResult> {
        let session_id = Uuid::new_v4();
        info!(
            %session_id,
            sender = %email.sender,
            subject = %email.subject,
            "Triage session started"
        );

        let classification = self.classifier.classify(&email);

        // Capture the index handle once; a refresh mid-session must not
        // affect this session. A missing index degrades retrieval rather
        // than failing triage.
        let index = self.index.current().await.ok();

        let outcome = self
            .orchestrator
            .run(&email, &classification, index, cancel)
            .await;

        let aborted = outcome.abort.is_some();
        let reply_text = self.composer.compose(
            &email,
            &classification,
            outcome.answer.as_deref(),
            &outcome.evidence,
            aborted,
        )?;

        info!(
            %session_id,
            category = classification.category.label(),
            urgency = classification.urgency.label(),
            citations = outcome.evidence.len(),
            tool_steps = outcome.tool_steps,
            aborted,
            "Triage session finished"
        );

        Ok(TriageResult {
            session_id,
            email,
            classification,
            evidence: outcome.evidence,
            reply_text,
            aborted,
            abort_reason: outcome.abort.map(|r| r.to_string()),
            processed_at: Utc::now(),
        })
    }

    /// Process a batch sequentially. Per-email failures are logged and
    /// skipped, never fatal for the batch.
    pub async fn triage_batch(&self, emails: Vec<Email>) -> Vec<TriageResult> {
        let total = emails.len();
        let mut results = Vec::with_capacity(total);
        for email in emails {
            let cancel = CancelToken::new();
            match self.triage(email, &cancel).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(error = %e, "Failed to triage email in batch");
                }
            }
        }
        info!(processed = results.len(), total, "Batch triage complete");
        results
    }
}
