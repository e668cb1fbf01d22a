//! Closed tool set for the orchestrator.
//!
//! The generation capability requests tools as opaque `{name, arguments}`
//! pairs; they are parsed here into a fixed set of variants and
//! dispatched through a fixed mapping — no dynamic lookup. Parse failures
//! are absorbed by the caller as degraded tool results, never session
//! failures.

use serde::Deserialize;

use crate::extract::EntityKind;
use crate::llm::ToolCallRequest;

pub const TOOL_EXTRACT: &str = "extract";
pub const TOOL_RETRIEVE: &str = "retrieve";

/// Parsed, validated tool request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Extract {
        /// Text to scan; defaults to the session email when absent.
        text: Option<String>,
        /// Kinds to extract; empty means all kinds.
        kinds: Vec<EntityKind>,
    },
    Retrieve {
        query: String,
        /// Requested result count; capped at the configured `top_k`.
        top_k: Option<usize>,
    },
}

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    text: Option<String>,
    #[serde(default)]
    kinds: Vec<EntityKind>,
}

#[derive(Debug, Deserialize)]
struct RetrieveArgs {
    query: String,
    top_k: Option<usize>,
}

impl ToolRequest {
    /// Parse an opaque call into the closed set. The error is a plain
    /// reason string — callers record it as a degraded result.
    pub fn parse(call: &ToolCallRequest) -> Result<Self, String> {
        match call.name.as_str() {
            TOOL_EXTRACT => {
                let args: ExtractArgs = serde_json::from_value(call.arguments.clone())
                    .map_err(|e| format!("invalid extract arguments: {e}"))?;
                Ok(Self::Extract {
                    text: args.text,
                    kinds: args.kinds,
                })
            }
            TOOL_RETRIEVE => {
                let args: RetrieveArgs = serde_json::from_value(call.arguments.clone())
                    .map_err(|e| format!("invalid retrieve arguments: {e}"))?;
                Ok(Self::Retrieve {
                    query: args.query,
                    top_k: args.top_k,
                })
            }
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn parses_retrieve() {
        let parsed =
            ToolRequest::parse(&call("retrieve", json!({ "query": "502", "top_k": 2 }))).unwrap();
        assert_eq!(
            parsed,
            ToolRequest::Retrieve {
                query: "502".into(),
                top_k: Some(2),
            }
        );
    }

    #[test]
    fn parses_extract_with_defaults() {
        let parsed = ToolRequest::parse(&call("extract", json!({}))).unwrap();
        assert_eq!(
            parsed,
            ToolRequest::Extract {
                text: None,
                kinds: vec![],
            }
        );
    }

    #[test]
    fn parses_extract_kinds() {
        let parsed =
            ToolRequest::parse(&call("extract", json!({ "kinds": ["id", "url"] }))).unwrap();
        assert_eq!(
            parsed,
            ToolRequest::Extract {
                text: None,
                kinds: vec![EntityKind::Id, EntityKind::Url],
            }
        );
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = ToolRequest::parse(&call("shell", json!({}))).unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[test]
    fn retrieve_requires_query() {
        let err = ToolRequest::parse(&call("retrieve", json!({ "top_k": 3 }))).unwrap_err();
        assert!(err.contains("invalid retrieve arguments"));
    }
}
