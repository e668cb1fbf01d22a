//! Pattern extraction over raw message text.
//!
//! Pure functions: no side effects, never fails per call. Which id
//! patterns count as ticket/incident identifiers is configuration, not
//! logic — malformed patterns are rejected once, at startup.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::triage::types::ExtractedEntities;

/// Entity kinds the extractor knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Email,
    Url,
    Id,
}

/// Extractor configuration: named id patterns, evaluated in order.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// `(pattern_name, regex)` pairs for ticket/incident identifiers.
    pub id_patterns: Vec<(String, String)>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            id_patterns: vec![
                // HTTP 4xx/5xx status codes mentioned in the message.
                ("http_status".into(), r"\b[45]\d\d\b".into()),
                // Prefixed ticket references (INC-1234, TCK-42, REQ-007).
                ("ticket".into(), r"\b(?:INC|TCK|REQ)-\d+\b".into()),
            ],
        }
    }
}

/// Compiled extractor. Build once, share freely.
#[derive(Debug)]
pub struct Extractor {
    email_re: Regex,
    url_re: Regex,
    id_res: Vec<(String, Regex)>,
}

impl Extractor {
    /// Compile an extractor from configuration.
    ///
    /// Fails only on a malformed id pattern — this is the startup-fatal
    /// path; extraction itself never errors.
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractionError> {
        let mut id_res = Vec::with_capacity(config.id_patterns.len());
        for (name, pattern) in config.id_patterns {
            let regex = Regex::new(&pattern)
                .map_err(|source| ExtractionError::InvalidPattern {
                    name: name.clone(),
                    source,
                })?;
            id_res.push((name, regex));
        }

        Ok(Self {
            // Static patterns, known-valid.
            email_re: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("email pattern is valid"),
            url_re: Regex::new(r#"https?://[^\s<>"'),;\]]+"#).expect("url pattern is valid"),
            id_res,
        })
    }

    /// Extractor with the default pattern set.
    pub fn with_defaults() -> Self {
        Self::new(ExtractorConfig::default()).expect("default patterns are valid")
    }

    /// Extract the requested kinds from `text`.
    ///
    /// Every requested kind gets an entry; kinds with no matches map to an
    /// empty list. Within a kind, matches are ordered by first occurrence
    /// in the text with duplicates removed.
    pub fn extract(&self, text: &str, kinds: &[EntityKind]) -> HashMap<EntityKind, Vec<String>> {
        let mut out = HashMap::new();
        for kind in kinds {
            if out.contains_key(kind) {
                continue;
            }
            let matches = match kind {
                EntityKind::Email => collect_matches(text, [&self.email_re]),
                EntityKind::Url => collect_matches(text, [&self.url_re]),
                EntityKind::Id => collect_matches(text, self.id_res.iter().map(|(_, re)| re)),
            };
            out.insert(*kind, matches);
        }
        out
    }

    /// Extract all three kinds at once, for email construction.
    pub fn entities(&self, text: &str) -> ExtractedEntities {
        let mut all = self.extract(
            text,
            &[EntityKind::Email, EntityKind::Url, EntityKind::Id],
        );
        ExtractedEntities {
            emails: all.remove(&EntityKind::Email).unwrap_or_default(),
            urls: all.remove(&EntityKind::Url).unwrap_or_default(),
            ids: all.remove(&EntityKind::Id).unwrap_or_default(),
        }
    }
}

/// Run every regex over the text and merge matches by byte offset, so the
/// result order is first occurrence in the text regardless of which
/// pattern matched. Duplicate strings keep their first position only.
fn collect_matches<'a>(
    text: &str,
    regexes: impl IntoIterator<Item = &'a Regex>,
) -> Vec<String> {
    let mut positioned: Vec<(usize, &str)> = Vec::new();
    for re in regexes {
        for m in re.find_iter(text) {
            positioned.push((m.start(), m.as_str()));
        }
    }
    positioned.sort_by_key(|(start, _)| *start);

    let mut seen = HashSet::new();
    positioned
        .into_iter()
        .filter(|(_, s)| seen.insert(s.to_string()))
        .map(|(_, s)| s.to_string())
        .collect()
}
