//! LLM client capability.
//!
//! The pipeline treats the model provider as an opaque collaborator behind
//! [`LlmClient`]. The default HTTP implementation lives in [`http`]; tests
//! supply in-crate mock implementations.

mod http;
mod outcome;
mod runner;

pub use http::OpenAiCompatClient;
pub use outcome::{LlmExecutionError, LlmOutcome};
pub use runner::{
    build_conversation_payload, flag_result_from_outcome, run_flag_check, run_llm,
    FlagCheckOutput, MAX_CONTEXT_TURNS,
};
pub(crate) use runner::{strip_code_fence, validate_against_schema};

use crate::types::TokenUsage;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One chat message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Chat-completion-style request with JSON response format.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    /// Always `{"type": "json_object"}` on the wire.
    pub response_format: ResponseFormat,
    /// Attached only when the client hits the official provider endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        Self {
            format_type: "json_object".into(),
        }
    }
}

/// Response from a chat-completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Message content; `None` when the model returned nothing.
    pub content: Option<String>,
    /// Usage block as reported by the provider, if any.
    pub usage: Option<TokenUsage>,
}

/// File-search-augmented request (hallucination check).
#[derive(Debug, Clone, Serialize)]
pub struct FileSearchRequest {
    pub model: String,
    pub input: String,
    /// Vector store id, `vs_`-prefixed.
    pub vector_store_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileSearchResponse {
    pub output_text: String,
    pub usage: Option<TokenUsage>,
}

/// Which flavor of endpoint a client is talking to. Decides whether the
/// `safety_identifier` parameter is attached to calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointVariant {
    /// The official provider's standard endpoint.
    Official,
    /// A known alternative-cloud variant of the official API.
    AlternativeCloud,
    /// A compatible third-party or local endpoint.
    Compatible,
}

/// Chat-completion capability the checks call into. The sole suspension
/// point in the pipeline; implementations must not hold locks across await.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_json(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// File-search-augmented call. Optional capability; the default
    /// implementation reports it as unsupported.
    async fn file_search(&self, request: FileSearchRequest) -> Result<FileSearchResponse> {
        let _ = request;
        Err(crate::Error::runtime(
            "file_search is not supported by this LLM client",
        ))
    }

    fn endpoint_variant(&self) -> EndpointVariant {
        EndpointVariant::Compatible
    }
}
