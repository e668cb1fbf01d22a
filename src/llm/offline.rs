//! Deterministic, network-free generation provider.
//!
//! Used when no API key is configured, and by tests that need a fully
//! reproducible session: one retrieval request for the email's salient
//! terms, then a final answer assembled from the numbered procedure steps
//! found in the retrieved excerpts.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::error::GenerationError;
use crate::llm::{GenerationProvider, GenerationRequest, GenerationResponse, ToolCallRequest};

/// How many procedure steps the drafted answer keeps.
const MAX_STEPS: usize = 4;

/// Deterministic generation capability.
pub struct OfflineProvider {
    step_re: Regex,
}

impl OfflineProvider {
    pub fn new() -> Self {
        Self {
            step_re: Regex::new(r"^\s*\d+\.\s+(.*)$").expect("step pattern is valid"),
        }
    }

    /// Retrieval query: the email text itself (clipped), which carries
    /// the subject, the error codes, and the salient body terms.
    fn build_query(request: &GenerationRequest) -> String {
        request
            .email
            .text()
            .chars()
            .take(200)
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Final answer from the evidence gathered so far.
    fn draft(&self, request: &GenerationRequest) -> String {
        let mut steps = Vec::new();
        for citation in &request.evidence {
            for line in citation.excerpt.lines() {
                if let Some(captures) = self.step_re.captures(line) {
                    steps.push(captures[1].trim().to_string());
                }
                if steps.len() >= MAX_STEPS {
                    break;
                }
            }
            if steps.len() >= MAX_STEPS {
                break;
            }
        }

        if steps.is_empty() {
            return "Nous n'avons pas trouvé de procédure documentée correspondant à votre \
                    message. Un agent va reprendre votre dossier."
                .to_string();
        }

        let mut out = String::from("D'après la documentation, voici la marche à suivre :\n");
        for (i, step) in steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
        out.trim_end().to_string()
    }
}

impl Default for OfflineProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationProvider for OfflineProvider {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        // One retrieval pass, then finalize.
        if request.allow_tools && request.transcript.is_empty() {
            return Ok(GenerationResponse::Tool {
                call: ToolCallRequest {
                    name: "retrieve".into(),
                    arguments: json!({ "query": Self::build_query(&request) }),
                },
            });
        }

        Ok(GenerationResponse::Final {
            text: self.draft(&request),
        })
    }

    fn name(&self) -> &str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extractor;
    use crate::triage::types::{Category, Citation, Classification, Email, Urgency};
    use crate::llm::ToolExchange;
    use chrono::Utc;

    fn request(
        evidence: Vec<Citation>,
        transcript: Vec<ToolExchange>,
        allow_tools: bool,
    ) -> GenerationRequest {
        let extractor = Extractor::with_defaults();
        let body = "Erreur 502 sur login, voir logs auth-gateway";
        GenerationRequest {
            email: Email {
                sender: "alice@client.example".into(),
                subject: "Connexion impossible".into(),
                body: body.into(),
                received_at: Utc::now(),
                entities: extractor.entities(body),
            },
            classification: Classification {
                category: Category::Incident,
                urgency: Urgency::Medium,
                rationale: "test".into(),
            },
            evidence,
            transcript,
            allow_tools,
        }
    }

    fn procedure_citation() -> Citation {
        Citation {
            document_id: "incident_502".into(),
            section_heading: "Procédure de diagnostic".into(),
            excerpt: "1. Vérifier l'état du reverse proxy.\n2. Consulter les logs.".into(),
            score: 2.0,
        }
    }

    #[tokio::test]
    async fn first_step_requests_retrieval_with_subject_and_ids() {
        let provider = OfflineProvider::new();
        match provider.generate(request(vec![], vec![], true)).await.unwrap() {
            GenerationResponse::Tool { call } => {
                assert_eq!(call.name, "retrieve");
                let query = call.arguments["query"].as_str().unwrap();
                assert!(query.contains("Connexion impossible"));
                assert!(query.contains("502"));
            }
            other => panic!("expected Tool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalizes_with_steps_from_evidence() {
        let provider = OfflineProvider::new();
        let transcript = vec![ToolExchange {
            call: ToolCallRequest {
                name: "retrieve".into(),
                arguments: json!({ "query": "502" }),
            },
            result: "1 citation".into(),
        }];
        match provider
            .generate(request(vec![procedure_citation()], transcript, true))
            .await
            .unwrap()
        {
            GenerationResponse::Final { text } => {
                assert!(text.contains("1. Vérifier l'état du reverse proxy."));
                assert!(text.contains("2. Consulter les logs."));
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalizes_without_tools_when_disallowed() {
        let provider = OfflineProvider::new();
        let response = provider.generate(request(vec![], vec![], false)).await.unwrap();
        assert!(matches!(response, GenerationResponse::Final { .. }));
    }

    #[tokio::test]
    async fn empty_evidence_yields_explicit_no_procedure_answer() {
        let provider = OfflineProvider::new();
        let transcript = vec![ToolExchange {
            call: ToolCallRequest {
                name: "retrieve".into(),
                arguments: json!({ "query": "rien" }),
            },
            result: "0 citations".into(),
        }];
        match provider.generate(request(vec![], transcript, true)).await.unwrap() {
            GenerationResponse::Final { text } => {
                assert!(text.contains("aucune") || text.contains("pas trouvé"));
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }
}
