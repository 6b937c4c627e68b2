//! Generic LLM check with a caller-supplied system prompt, for bespoke
//! policies that have no dedicated check.

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
pub struct CustomPromptConfig {
    /// Model used for classification.
    pub model: String,
    /// Full system prompt describing the policy to enforce. Output-format
    /// instructions are appended automatically unless already present.
    #[schemars(length(min = 1))]
    pub system_prompt: String,
    #[serde(default = "super::jailbreak::default_threshold")]
    pub confidence_threshold: f64,
}

pub async fn custom_prompt_check(
    ctx: &GuardrailContext,
    input: &str,
    config: Value,
) -> Result<GuardrailResult> {
    let config: CustomPromptConfig = registry::typed_config("custom_prompt", &config)?;
    run_flag_check(
        ctx,
        input,
        &config.system_prompt,
        &config.model,
        config.confidence_threshold,
        false,
        "custom_prompt",
    )
    .await
}

pub fn definition() -> CheckDefinition {
    let check: CheckFn =
        Arc::new(|ctx, input, config| Box::pin(custom_prompt_check(ctx, input, config)));
    CheckDefinition::builder("custom_prompt", check)
        .description("Runs a caller-supplied policy prompt against the input")
        .config_schema(registry::schema_for::<CustomPromptConfig>())
        .requires(Capability::LlmClient)
        .engine(Engine::Llm)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_prompt_is_required() {
        let parsed: std::result::Result<CustomPromptConfig, _> =
            serde_json::from_value(json!({"model": "gpt-4.1-mini"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn threshold_defaults() {
        let config: CustomPromptConfig = serde_json::from_value(json!({
            "model": "gpt-4.1-mini",
            "system_prompt": "Flag rude messages."
        }))
        .unwrap();
        assert_eq!(config.confidence_threshold, 0.7);
    }
}
