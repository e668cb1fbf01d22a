//! Shared types for the triage pipeline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Email ───────────────────────────────────────────────────────────

/// Entities pulled out of a message body by pattern matching.
///
/// Each list is ordered by first occurrence in the text, duplicates
/// removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Email addresses mentioned in the text.
    pub emails: Vec<String>,
    /// URLs mentioned in the text.
    pub urls: Vec<String>,
    /// Ticket/incident identifiers and error codes.
    pub ids: Vec<String>,
}

/// A normalized support email, immutable once constructed.
///
/// The ingestion collaborator guarantees `body` is plain text with no
/// MIME artifacts. Entities are extracted once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Sender address, optionally with a display name
    /// (`Alice Martin <alice@example.com>`).
    pub sender: String,
    /// Subject line (empty string when absent).
    pub subject: String,
    /// Plain-text message body.
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Entities extracted from subject + body.
    pub entities: ExtractedEntities,
}

impl Email {
    /// Subject and body joined for keyword/pattern scans.
    pub fn text(&self) -> String {
        format!("{} {}", self.subject, self.body)
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Ticket category, in triage priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Incident,
    Request,
    Question,
}

impl Category {
    /// Short label for logging and reply rendering.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Incident => "incident",
            Self::Request => "demande",
            Self::Question => "question",
        }
    }
}

/// Urgency level. Escalation rules raise it one level at a time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// One level up, capped at `Critical`.
    pub fn raised(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Critical,
            Self::Critical => Self::Critical,
        }
    }

    /// Short label for logging and reply rendering.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "basse",
            Self::Medium => "normale",
            Self::High => "haute",
            Self::Critical => "critique",
        }
    }
}

/// Triage decision for one email. Produced exactly once per email and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub urgency: Urgency,
    /// Human-readable summary of the matched keywords and escalation
    /// rules, for audit.
    pub rationale: String,
}

// ── Evidence ────────────────────────────────────────────────────────

/// A verbatim excerpt plus provenance pointer into the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Id of the source document in the index.
    pub document_id: String,
    /// Heading of the cited section.
    pub section_heading: String,
    /// Verbatim substring of the section text — never paraphrased.
    pub excerpt: String,
    /// Relevance score at query time (higher is better).
    pub score: f32,
}

impl Citation {
    /// Dedup key: two citations of the same section are the same evidence.
    pub fn key(&self) -> (String, String) {
        (self.document_id.clone(), self.section_heading.clone())
    }
}

/// Ordered, deduplicated citations accumulated across a session.
///
/// Append-only: entries keep the order in which they were first observed;
/// later duplicates (same document + heading) are dropped, not reordered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvidenceSet {
    citations: Vec<Citation>,
    #[serde(skip)]
    seen: HashSet<(String, String)>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a citation unless its (document, heading) pair was already
    /// observed. Returns whether it was inserted.
    pub fn push(&mut self, citation: Citation) -> bool {
        if self.seen.insert(citation.key()) {
            self.citations.push(citation);
            true
        } else {
            false
        }
    }

    /// Append a batch, preserving first-observation order.
    pub fn extend(&mut self, citations: impl IntoIterator<Item = Citation>) -> usize {
        citations
            .into_iter()
            .filter(|c| self.push(c.clone()))
            .count()
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

// ── Session result ──────────────────────────────────────────────────

/// Terminal artifact of one triage session, immutable once emitted.
///
/// An aborted session still carries whatever classification and evidence
/// were computed — never a silent empty output.
#[derive(Debug, Clone, Serialize)]
pub struct TriageResult {
    /// Session id, for correlating logs.
    pub session_id: Uuid,
    pub email: Email,
    pub classification: Classification,
    pub evidence: EvidenceSet,
    /// The composed, cited reply.
    pub reply_text: String,
    /// True when the orchestrator aborted before a final answer.
    pub aborted: bool,
    /// Why the session aborted, when it did.
    pub abort_reason: Option<String>,
    /// When the session finished.
    pub processed_at: DateTime<Utc>,
}
