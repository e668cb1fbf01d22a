//! HTTP-backed generation provider (messages API).
//!
//! Speaks the Anthropic-style messages endpoint directly: one user turn
//! carrying the rendered session state, plus `extract`/`retrieve` tool
//! definitions while tools are allowed. HTTP and decoding failures map
//! onto [`GenerationError`]; the orchestrator owns timeouts and retries.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::GenerationError;
use crate::llm::{
    GenerationProvider, GenerationRequest, GenerationResponse, ToolCallRequest,
};

/// Default messages endpoint.
const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "\
You draft grounded replies for a support triage desk. Work only from the \
email, its classification, and the retrieved knowledge-base excerpts. \
Call `retrieve` to gather evidence before answering and `extract` to pull \
identifiers out of text. Never invent procedures: if the evidence does \
not cover the request, say so. Answer with the reply body only, in the \
sender's language, professional register.";

/// Configuration for the HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
}

impl HttpProviderConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key,
            model: model.into(),
            max_tokens: 1024,
        }
    }
}

/// Messages-API generation provider.
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let body = build_request_body(&self.config, &request);

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GenerationError::Unavailable {
                reason: format!("status {status}: {detail}"),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse {
                reason: e.to_string(),
            })?;

        debug!(model = %self.config.model, "Generation call completed");
        parse_response_body(&payload)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Assemble the messages-API request body from the session state.
fn build_request_body(config: &HttpProviderConfig, request: &GenerationRequest) -> Value {
    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "system": SYSTEM_PROMPT,
        "messages": [
            { "role": "user", "content": render_context(request) }
        ],
    });

    if request.allow_tools {
        body["tools"] = json!([
            {
                "name": "retrieve",
                "description": "Search the knowledge base and return ranked, citable excerpts.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search terms" },
                        "top_k": { "type": "integer", "description": "Max excerpts to return" }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "extract",
                "description": "Extract email addresses, URLs, and ticket/error identifiers from text.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "Text to scan (defaults to the email)" },
                        "kinds": {
                            "type": "array",
                            "items": { "type": "string", "enum": ["email", "url", "id"] }
                        }
                    }
                }
            }
        ]);
    }

    body
}

/// Render the structured session state as the user turn.
fn render_context(request: &GenerationRequest) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Email de {} recu le {}\nObjet: {}\n\n{}\n",
        request.email.sender,
        request.email.received_at.format("%Y-%m-%d %H:%M UTC"),
        request.email.subject,
        request.email.body,
    ));

    out.push_str(&format!(
        "\nClassification: {} / urgence {} ({})\n",
        request.classification.category.label(),
        request.classification.urgency.label(),
        request.classification.rationale,
    ));

    if request.evidence.is_empty() {
        out.push_str("\nAucune citation collectée pour l'instant.\n");
    } else {
        out.push_str("\nCitations collectées:\n");
        for (i, citation) in request.evidence.iter().enumerate() {
            out.push_str(&format!(
                "[{}] {} / {}: {}\n",
                i + 1,
                citation.document_id,
                citation.section_heading,
                citation.excerpt,
            ));
        }
    }

    for exchange in &request.transcript {
        out.push_str(&format!(
            "\nOutil {} -> {}\n",
            exchange.call.name, exchange.result,
        ));
    }

    if !request.allow_tools {
        out.push_str("\nLes outils ne sont plus disponibles: produis la réponse finale maintenant.\n");
    }

    out
}

/// Decode a messages-API response: a `tool_use` block wins over text.
fn parse_response_body(payload: &Value) -> Result<GenerationResponse, GenerationError> {
    let blocks = payload
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::InvalidResponse {
            reason: "missing content array".into(),
        })?;

    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("tool_use") {
            let name = block
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| GenerationError::InvalidResponse {
                    reason: "tool_use block without name".into(),
                })?;
            let arguments = block.get("input").cloned().unwrap_or(Value::Null);
            return Ok(GenerationResponse::Tool {
                call: ToolCallRequest {
                    name: name.to_string(),
                    arguments,
                },
            });
        }
    }

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if text.is_empty() {
        return Err(GenerationError::InvalidResponse {
            reason: "response carries neither text nor tool_use".into(),
        });
    }

    Ok(GenerationResponse::Final { text })
}
