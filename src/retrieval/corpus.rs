//! Knowledge-base corpus: heading-delimited documents.
//!
//! The corpus is a directory of `.md`/`.txt` files. Load order is lexical
//! filename order — that order is the deterministic tie-break for equal
//! retrieval scores.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::error::RetrievalError;

/// One heading-delimited section of a knowledge document.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section heading (the document title for preamble text).
    pub heading: String,
    /// Section body text.
    pub text: String,
    /// Byte offset of the section start in the source document.
    pub offset: usize,
}

/// An immutable knowledge document, owned by the index once built.
#[derive(Debug, Clone)]
pub struct KnowledgeDocument {
    /// Stable id (file stem).
    pub id: String,
    /// First level-1 heading, or the id when the document has none.
    pub title: String,
    /// Sections in document order.
    pub sections: Vec<Section>,
}

impl KnowledgeDocument {
    /// Parse a document from raw text.
    ///
    /// Lines starting with `#` open a new section; text before the first
    /// heading becomes a section titled after the document. Sections with
    /// no body text are dropped.
    pub fn parse(id: impl Into<String>, content: &str) -> Self {
        let id = id.into();

        let title = content
            .lines()
            .find(|l| l.starts_with("# "))
            .map(|l| l.trim_start_matches('#').trim().to_string())
            .unwrap_or_else(|| id.clone());

        let mut sections = Vec::new();
        let mut heading = title.clone();
        let mut body: Vec<&str> = Vec::new();
        let mut section_offset = 0usize;
        let mut cursor = 0usize;

        fn flush(heading: &str, body: &mut Vec<&str>, offset: usize, sections: &mut Vec<Section>) {
            let text = body.join("\n").trim().to_string();
            if !text.is_empty() {
                sections.push(Section {
                    heading: heading.to_string(),
                    text,
                    offset,
                });
            }
            body.clear();
        }

        for line in content.lines() {
            if line.starts_with('#') {
                flush(&heading, &mut body, section_offset, &mut sections);
                heading = line.trim_start_matches('#').trim().to_string();
                section_offset = cursor;
            } else {
                body.push(line);
            }
            // +1 for the newline; the final line may overshoot by one,
            // which never matters for an offset.
            cursor += line.len() + 1;
        }
        flush(&heading, &mut body, section_offset, &mut sections);

        Self { id, title, sections }
    }
}

/// Load every `.md`/`.txt` document under `dir`, in lexical filename
/// order.
pub async fn load_corpus(dir: impl AsRef<Path>) -> Result<Vec<KnowledgeDocument>, RetrievalError> {
    let dir = dir.as_ref();
    let mut read_dir = fs::read_dir(dir).await.map_err(|e| RetrievalError::CorpusLoad {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| {
        RetrievalError::CorpusLoad {
            path: dir.display().to_string(),
            reason: e.to_string(),
        }
    })? {
        let path = entry.path();
        if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md" | "txt")
        ) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| RetrievalError::CorpusLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        let doc = KnowledgeDocument::parse(id, &content);
        debug!(id = %doc.id, sections = doc.sections.len(), "Loaded knowledge document");
        documents.push(doc);
    }

    info!(count = documents.len(), dir = %dir.display(), "Knowledge corpus loaded");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Erreur 502 Bad Gateway

Intro sur les erreurs de passerelle.

## Diagnostic

1. Vérifier l'état du reverse proxy.
2. Consulter les logs de l'auth-gateway.

## Remédiation

Redémarrer le service en cause.
";

    #[test]
    fn parse_splits_on_headings() {
        let doc = KnowledgeDocument::parse("incident_502", SAMPLE);
        assert_eq!(doc.title, "Erreur 502 Bad Gateway");
        let headings: Vec<&str> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(
            headings,
            vec!["Erreur 502 Bad Gateway", "Diagnostic", "Remédiation"]
        );
        assert!(doc.sections[1].text.contains("reverse proxy"));
    }

    #[test]
    fn parse_offsets_are_increasing() {
        let doc = KnowledgeDocument::parse("incident_502", SAMPLE);
        let offsets: Vec<usize> = doc.sections.iter().map(|s| s.offset).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn parse_without_headings_yields_one_section() {
        let doc = KnowledgeDocument::parse("note", "Juste un paragraphe.\nSans titre.");
        assert_eq!(doc.title, "note");
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].heading, "note");
        assert_eq!(doc.sections[0].offset, 0);
    }

    #[test]
    fn parse_drops_empty_sections() {
        let doc = KnowledgeDocument::parse("doc", "# A\n\n# B\n\nContenu B.\n");
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].heading, "B");
    }

    #[tokio::test]
    async fn load_corpus_is_lexically_ordered() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b_doc.md"), "# B\n\ntexte b\n").unwrap();
        std::fs::write(dir.path().join("a_doc.md"), "# A\n\ntexte a\n").unwrap();
        std::fs::write(dir.path().join("ignored.json"), "{}").unwrap();

        let docs = load_corpus(dir.path()).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a_doc", "b_doc"]);
    }

    #[tokio::test]
    async fn load_corpus_missing_dir_fails() {
        let result = load_corpus("/nonexistent/kb/dir").await;
        assert!(matches!(
            result,
            Err(RetrievalError::CorpusLoad { .. })
        ));
    }
}
