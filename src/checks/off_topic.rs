//! Topical-drift detection: flags input outside the configured business scope.

use crate::context::{Capability, GuardrailContext};
use crate::llm::run_flag_check;
use crate::registry::{self, CheckDefinition, CheckFn, Engine};
use crate::types::GuardrailResult;
use crate::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OffTopicConfig {
    /// Model used for classification.
    pub model: String,
    /// Description of what the application is for; input outside this scope
    /// is flagged.
    #[schemars(length(min = 1))]
    pub business_scope: String,
    #[serde(default = "super::jailbreak::default_threshold")]
    pub confidence_threshold: f64,
}

fn system_prompt(business_scope: &str) -> String {
    format!(
        "You are a topical relevance reviewer. The application's business \
         scope is:\n\n{}\n\nDecide whether the user input falls outside that \
         scope. Greetings, clarifications, and meta-questions about the \
         application itself are in scope. Consider the conversation history \
         when provided; a follow-up can be on-topic even when it reads \
         ambiguously on its own.",
        business_scope.trim()
    )
}

pub async fn off_topic_check(
    ctx: &GuardrailContext,
    input: &str,
    config: Value,
) -> Result<GuardrailResult> {
    let config: OffTopicConfig = registry::typed_config("off_topic", &config)?;
    run_flag_check(
        ctx,
        input,
        &system_prompt(&config.business_scope),
        &config.model,
        config.confidence_threshold,
        true,
        "off_topic",
    )
    .await
}

pub fn definition() -> CheckDefinition {
    let check: CheckFn =
        Arc::new(|ctx, input, config| Box::pin(off_topic_check(ctx, input, config)));
    CheckDefinition::builder("off_topic", check)
        .description("Flags input that falls outside the configured business scope")
        .config_schema(registry::schema_for::<OffTopicConfig>())
        .requires(Capability::LlmClient)
        .engine(Engine::Llm)
        .uses_conversation_history(true)
        .build()
}
