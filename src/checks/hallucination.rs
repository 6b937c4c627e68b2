//! Hallucination detection: verifies factual claims against a vector-store
//! knowledge source via a file-search-augmented LLM call.

use crate::context::{Capability, GuardrailContext};
use crate::llm::{
    self, flag_result_from_outcome, FileSearchRequest, FlagCheckOutput, LlmExecutionError,
    LlmOutcome,
};
use crate::registry::{self, CheckDefinition, CheckFn, Engine};
use crate::types::{GuardrailResult, TokenUsage};
use crate::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "\
You are a factual accuracy reviewer. Search the attached knowledge source \
for evidence about each factual claim in the text below. Flag the text only \
if it makes a claim that is contradicted by the retrieved documents. Claims \
the documents neither support nor contradict are not hallucinations. \
Respond with JSON only: {\"flagged\": boolean, \"confidence\": number \
between 0.0 and 1.0, \"reason\": string}.";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HallucinationConfig {
    /// Model used for the file-search-augmented call.
    pub model: String,
    /// Vector store id holding the reference documents.
    #[schemars(regex(pattern = r"^vs_"))]
    pub knowledge_source: String,
    #[serde(default = "super::jailbreak::default_threshold")]
    pub confidence_threshold: f64,
}

pub async fn hallucination_check(
    ctx: &GuardrailContext,
    input: &str,
    config: Value,
) -> Result<GuardrailResult> {
    let config: HallucinationConfig = registry::typed_config("hallucination", &config)?;
    let client = ctx.require_llm_client("hallucination")?;

    let request = FileSearchRequest {
        model: config.model.clone(),
        input: format!("{}\n\nText to verify:\n{}", SYSTEM_PROMPT, input.trim()),
        vector_store_id: config.knowledge_source.clone(),
    };

    let schema = registry::schema_for::<FlagCheckOutput>();
    let (outcome, usage) = match client.file_search(request).await {
        Ok(response) => {
            let usage = response
                .usage
                .unwrap_or_else(|| TokenUsage::unavailable("provider returned no usage"));
            (parse_output(&response.output_text, &schema), usage)
        }
        Err(e) => {
            let message = e.to_string();
            let error = if message.contains("content_filter") {
                LlmExecutionError::content_filter(message)
            } else {
                LlmExecutionError::fail_open(message)
            };
            (
                LlmOutcome::ExecutionError(error),
                TokenUsage::unavailable("LLM call failed"),
            )
        }
    };

    Ok(flag_result_from_outcome(
        outcome,
        usage,
        input,
        config.confidence_threshold,
    ))
}

/// Same fence-strip/parse/validate path the chat runner uses, applied to the
/// file-search response text.
fn parse_output(output_text: &str, schema: &Value) -> LlmOutcome {
    let content = output_text.trim();
    if content.is_empty() {
        return LlmOutcome::ExecutionError(LlmExecutionError::fail_open("LLM returned no content"));
    }
    let parsed: Value = match serde_json::from_str(llm::strip_code_fence(content)) {
        Ok(v) => v,
        Err(_) => {
            return LlmOutcome::ExecutionError(LlmExecutionError::fail_open(
                "LLM returned non-JSON or malformed JSON.",
            ));
        }
    };
    match llm::validate_against_schema(&parsed, schema) {
        Ok(()) => LlmOutcome::Ok(parsed),
        Err(issues) => LlmOutcome::ExecutionError(LlmExecutionError::schema_failure(issues)),
    }
}

pub fn definition() -> CheckDefinition {
    let check: CheckFn =
        Arc::new(|ctx, input, config| Box::pin(hallucination_check(ctx, input, config)));
    CheckDefinition::builder("hallucination", check)
        .description("Flags claims contradicted by a vector-store knowledge source")
        .config_schema(registry::schema_for::<HallucinationConfig>())
        .requires(Capability::LlmClient)
        .engine(Engine::FileSearch)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRequest, ChatResponse, FileSearchResponse, LlmClient};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedFileSearch(String);

    #[async_trait]
    impl LlmClient for FixedFileSearch {
        async fn chat_json(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Err(crate::Error::runtime("not used"))
        }

        async fn file_search(&self, _request: FileSearchRequest) -> Result<FileSearchResponse> {
            Ok(FileSearchResponse {
                output_text: self.0.clone(),
                usage: Some(TokenUsage::available(10, 5, 15)),
            })
        }
    }

    #[test]
    fn knowledge_source_must_be_a_vector_store_id() {
        let def = Arc::new(definition());
        let err = def
            .instantiate(json!({"model": "gpt-4.1-mini", "knowledge_source": "docs.txt"}))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Configuration { .. }));

        assert!(def
            .instantiate(json!({"model": "gpt-4.1-mini", "knowledge_source": "vs_abc123"}))
            .is_ok());
    }

    #[tokio::test]
    async fn contradicted_claim_trips_the_wire() {
        let client = Arc::new(FixedFileSearch(
            json!({"flagged": true, "confidence": 0.9, "reason": "contradicted"}).to_string(),
        ));
        let ctx = GuardrailContext::new().with_llm_client(client);
        let result = hallucination_check(
            &ctx,
            "The warranty lasts 10 years.",
            json!({"model": "gpt-4.1-mini", "knowledge_source": "vs_abc"}),
        )
        .await
        .unwrap();
        assert!(result.tripwire_triggered);
        assert_eq!(result.info["confidence"], json!(0.9));
    }

    #[tokio::test]
    async fn malformed_response_fails_open() {
        let client = Arc::new(FixedFileSearch("not json at all".into()));
        let ctx = GuardrailContext::new().with_llm_client(client);
        let result = hallucination_check(
            &ctx,
            "claim",
            json!({"model": "gpt-4.1-mini", "knowledge_source": "vs_abc"}),
        )
        .await
        .unwrap();
        assert!(!result.tripwire_triggered);
        assert!(result.execution_failed);
        // usage from the successful call survives the parse failure
        assert_eq!(result.info["token_usage"]["total_tokens"], json!(15));
    }

    #[tokio::test]
    async fn unsupported_client_fails_open() {
        struct ChatOnly;
        #[async_trait]
        impl LlmClient for ChatOnly {
            async fn chat_json(&self, _request: ChatRequest) -> Result<ChatResponse> {
                Ok(ChatResponse::default())
            }
        }
        let ctx = GuardrailContext::new().with_llm_client(Arc::new(ChatOnly));
        let result = hallucination_check(
            &ctx,
            "claim",
            json!({"model": "gpt-4.1-mini", "knowledge_source": "vs_abc"}),
        )
        .await
        .unwrap();
        assert!(result.execution_failed);
        assert!(!result.tripwire_triggered);
    }
}
