//! Generation capability — the only non-deterministic seam.
//!
//! The orchestrator talks to an opaque `GenerationProvider`: structured
//! session state in, either a final answer or a tool request out. Nothing
//! beyond that contract is assumed about the capability's internals.
//!
//! Providers:
//! - [`HttpProvider`]: messages-API backend over HTTP
//! - [`OfflineProvider`]: deterministic, network-free drafting

pub mod http;
pub mod offline;

pub use http::{HttpProvider, HttpProviderConfig};
pub use offline::OfflineProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::triage::types::{Citation, Classification, Email};

/// A tool invocation requested by the generation capability.
///
/// `name`/`arguments` stay opaque here; the orchestrator parses them into
/// its closed tool set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One completed tool exchange, replayed to the capability on the next
/// reasoning step.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExchange {
    pub call: ToolCallRequest,
    /// Compact, serialized summary of the tool result.
    pub result: String,
}

/// Structured session state sent on every reasoning step.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub email: Email,
    pub classification: Classification,
    /// Evidence accumulated so far, in first-observation order.
    pub evidence: Vec<Citation>,
    /// Prior tool exchanges of this session.
    pub transcript: Vec<ToolExchange>,
    /// False once the orchestrator forces finalization; tool requests are
    /// no longer honored.
    pub allow_tools: bool,
}

/// The capability's answer to one reasoning step.
#[derive(Debug, Clone)]
pub enum GenerationResponse {
    /// A final answer; the session can finalize.
    Final { text: String },
    /// A requested tool call; the orchestrator dispatches and loops.
    Tool { call: ToolCallRequest },
}

/// The opaque text-reasoning/tool-requesting dependency.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// One reasoning step over the session state.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
