//! Retrieval engine — lexical index over the knowledge corpus.
//!
//! Scoring is stem-overlap between query and section text (accent-folded,
//! French-stemmed tokens of three characters or more), with a small bonus
//! for sections that contain numbered procedure steps. Ties are broken by
//! document insertion order, then section offset, so results are fully
//! deterministic. Excerpts are verbatim substrings of section text.

pub mod corpus;

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::RwLock;
use tracing::debug;

pub use corpus::{KnowledgeDocument, Section, load_corpus};

use crate::error::RetrievalError;
use crate::text::{stem, tokenize};
use crate::triage::types::Citation;

/// Tokens shorter than this carry no signal.
const MIN_TOKEN_LEN: usize = 3;

/// Maximum excerpt length, in characters. Excerpts are clipped at a char
/// boundary, never padded or paraphrased.
const EXCERPT_MAX_CHARS: usize = 280;

/// One scored section in the flattened index.
struct IndexEntry {
    doc_order: usize,
    section_order: usize,
    stems: HashSet<String>,
    /// Section contains `1. ...` style numbered steps — procedures get a
    /// half-point bonus.
    has_steps: bool,
}

/// Immutable lexical index. Build once; replace wholesale on refresh.
pub struct SearchIndex {
    documents: Vec<KnowledgeDocument>,
    entries: Vec<IndexEntry>,
}

impl SearchIndex {
    /// Build the index from a corpus. Document order is preserved and used
    /// as the primary tie-break at query time.
    pub fn build(documents: Vec<KnowledgeDocument>) -> Self {
        let steps_re = Regex::new(r"(?m)^\s*\d+\.\s").expect("steps pattern is valid");

        let mut entries = Vec::new();
        for (doc_order, doc) in documents.iter().enumerate() {
            for (section_order, section) in doc.sections.iter().enumerate() {
                entries.push(IndexEntry {
                    doc_order,
                    section_order,
                    stems: stem_set(&format!("{} {}", section.heading, section.text)),
                    has_steps: steps_re.is_match(&section.text),
                });
            }
        }

        debug!(
            documents = documents.len(),
            sections = entries.len(),
            "Search index built"
        );
        Self { documents, entries }
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Rank sections against `query` and return at most `top_k` citations,
    /// best first. An empty index or an unmatchable query yields an empty
    /// list, not an error.
    pub fn query(&self, query: &str, top_k: usize) -> Vec<Citation> {
        let query_stems = stem_set(query);
        if query_stems.is_empty() || top_k == 0 {
            return Vec::new();
        }

        // score_key = 2 * overlap + steps bonus; integer keys keep the
        // ordering total and deterministic.
        let mut ranked: Vec<(usize, &IndexEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let overlap = entry.stems.intersection(&query_stems).count();
                if overlap == 0 {
                    return None;
                }
                let score_key = 2 * overlap + usize::from(entry.has_steps);
                Some((score_key, entry))
            })
            .collect();

        ranked.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .cmp(score_a)
                .then(a.doc_order.cmp(&b.doc_order))
                .then(a.section_order.cmp(&b.section_order))
        });

        ranked
            .into_iter()
            .take(top_k)
            .map(|(score_key, entry)| {
                let doc = &self.documents[entry.doc_order];
                let section = &doc.sections[entry.section_order];
                Citation {
                    document_id: doc.id.clone(),
                    section_heading: section.heading.clone(),
                    excerpt: clip_excerpt(&section.text),
                    score: score_key as f32 / 2.0,
                }
            })
            .collect()
    }
}

/// Stems of the distinctive tokens in `text`.
fn stem_set(text: &str) -> HashSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(|t| stem(&t))
        .collect()
}

/// Clip section text to the excerpt budget at a char boundary. The result
/// is always a verbatim prefix of the section text.
fn clip_excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_MAX_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

// ── Swappable handle ────────────────────────────────────────────────

/// Explicitly owned, swappable index handle.
///
/// `install` replaces the index wholesale; sessions capture an
/// `Arc<SearchIndex>` once and keep querying the handle they were given
/// even across a refresh. Querying before the first `install` is
/// `IndexNotReady`.
#[derive(Default)]
pub struct IndexSlot {
    slot: RwLock<Option<Arc<SearchIndex>>>,
}

impl IndexSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap in a freshly built index.
    pub async fn install(&self, index: SearchIndex) {
        let mut slot = self.slot.write().await;
        *slot = Some(Arc::new(index));
    }

    /// Current index handle, or `IndexNotReady` before the first install.
    pub async fn current(&self) -> Result<Arc<SearchIndex>, RetrievalError> {
        self.slot
            .read()
            .await
            .clone()
            .ok_or(RetrievalError::IndexNotReady)
    }
}
