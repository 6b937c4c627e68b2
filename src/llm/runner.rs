//! LLM check runner: prompt assembly, response parsing, and uniform failure
//! classification.
//!
//! Every LLM-prompted check funnels through [`run_llm`]. The runner owns the
//! fail-open contract: no failure mode escapes as an error, and token usage
//! is captured immediately after the call regardless of what happens to the
//! response afterwards.

use super::outcome::{LlmExecutionError, LlmOutcome};
use super::{ChatMessage, ChatRequest, EndpointVariant, LlmClient, ResponseFormat};
use crate::context::GuardrailContext;
use crate::conversation::NormalizedEntry;
use crate::types::{GuardrailResult, TokenUsage};
use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Default number of trailing conversation turns included in the analysis
/// payload.
pub const MAX_CONTEXT_TURNS: usize = 10;

/// Identifier attached to calls against the official endpoint.
const SAFETY_IDENTIFIER: &str = "llm-guardrails";

/// Standard output shape for flag-style checks (jailbreak, off-topic,
/// custom prompt).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FlagCheckOutput {
    pub flagged: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Run one LLM check call end to end.
///
/// Returns the classified outcome paired with the token usage snapshot. The
/// usage reflects the API call itself and survives parse/validation failures.
pub async fn run_llm(
    text: &str,
    system_prompt: &str,
    client: &dyn LlmClient,
    model: &str,
    output_schema: &Value,
    conversation: Option<&[NormalizedEntry]>,
    max_turns: usize,
) -> (LlmOutcome, TokenUsage) {
    let full_prompt = assemble_system_prompt(system_prompt, output_schema);
    let user_content = match conversation {
        Some(entries) if !entries.is_empty() => {
            build_conversation_payload(entries, text, max_turns)
        }
        _ => text.trim().to_string(),
    };

    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(full_prompt),
            ChatMessage::user(user_content),
        ],
        temperature: temperature_for(model),
        response_format: ResponseFormat::default(),
        safety_identifier: (client.endpoint_variant() == EndpointVariant::Official)
            .then(|| SAFETY_IDENTIFIER.to_string()),
    };

    let response = match client.chat_json(request).await {
        Ok(response) => response,
        Err(e) => {
            let message = e.to_string();
            let usage = TokenUsage::unavailable("LLM call failed");
            // A provider-side content filter is the one failure treated as a
            // confirmed violation rather than an internal error.
            let error = if message.contains("content_filter") {
                LlmExecutionError::content_filter(message)
            } else {
                LlmExecutionError::fail_open(message)
            };
            return (LlmOutcome::ExecutionError(error), usage);
        }
    };

    // Usage snapshot taken before any parsing can fail.
    let usage = response
        .usage
        .unwrap_or_else(|| TokenUsage::unavailable("provider returned no usage"));

    let content = match response.content.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => {
            return (
                LlmOutcome::ExecutionError(LlmExecutionError::fail_open(
                    "LLM returned no content",
                )),
                usage,
            );
        }
    };

    let parsed: Value = match serde_json::from_str(strip_code_fence(&content)) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "LLM response was not valid JSON");
            return (
                LlmOutcome::ExecutionError(LlmExecutionError::fail_open(
                    "LLM returned non-JSON or malformed JSON.",
                )),
                usage,
            );
        }
    };

    match validate_against_schema(&parsed, output_schema) {
        Ok(()) => (LlmOutcome::Ok(parsed), usage),
        Err(issues) => (
            LlmOutcome::ExecutionError(LlmExecutionError::schema_failure(issues)),
            usage,
        ),
    }
}

/// Shared execution path for flag-style checks: run the model, interpret the
/// outcome, and produce a [`GuardrailResult`] with the standard info fields.
pub async fn run_flag_check(
    ctx: &GuardrailContext,
    text: &str,
    system_prompt: &str,
    model: &str,
    confidence_threshold: f64,
    use_history: bool,
    check_source: &str,
) -> Result<GuardrailResult> {
    let client = ctx.require_llm_client(check_source)?;
    let history = if use_history {
        ctx.conversation_entries()
    } else {
        Vec::new()
    };

    let schema = crate::registry::schema_for::<FlagCheckOutput>();
    let (outcome, usage) = run_llm(
        text,
        system_prompt,
        client.as_ref(),
        model,
        &schema,
        (!history.is_empty()).then_some(history.as_slice()),
        MAX_CONTEXT_TURNS,
    )
    .await;

    Ok(flag_result_from_outcome(
        outcome,
        usage,
        text,
        confidence_threshold,
    ))
}

/// Interpret a flag-style outcome into a verdict.
pub fn flag_result_from_outcome(
    outcome: LlmOutcome,
    usage: TokenUsage,
    checked_text: &str,
    confidence_threshold: f64,
) -> GuardrailResult {
    let usage_value = serde_json::to_value(&usage).unwrap_or(Value::Null);
    match outcome {
        LlmOutcome::Ok(value) => {
            let flagged = value.get("flagged").and_then(Value::as_bool).unwrap_or(false);
            let confidence = value
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let mut result =
                GuardrailResult::new(flagged && confidence >= confidence_threshold, checked_text)
                    .with_info("flagged", Value::Bool(flagged))
                    .with_info("confidence", json!(confidence))
                    .with_info("threshold", json!(confidence_threshold))
                    .with_info("token_usage", usage_value);
            if let Some(reason) = value.get("reason").and_then(Value::as_str) {
                result = result.with_info("reason", Value::String(reason.into()));
            }
            result
        }
        LlmOutcome::ExecutionError(error) => {
            let mut result = if error.flagged {
                // Fail-closed: content-filter rejection counts as a trip.
                GuardrailResult::new(true, checked_text)
            } else {
                GuardrailResult::execution_failure(checked_text, error.message.clone())
            };
            result = result
                .with_info("flagged", Value::Bool(error.flagged))
                .with_info("confidence", json!(error.confidence))
                .with_info("error_message", Value::String(error.message))
                .with_info("token_usage", usage_value);
            result.with_info_map(error.info)
        }
    }
}

/// Serialize the trailing conversation window plus the latest input as the
/// user message content.
pub fn build_conversation_payload(
    conversation: &[NormalizedEntry],
    text: &str,
    max_turns: usize,
) -> String {
    let start = conversation.len().saturating_sub(max_turns);
    json!({
        "conversation": &conversation[start..],
        "latest_input": text.trim(),
    })
    .to_string()
}

/// Decide the sampling temperature for a model.
///
/// Fixed at 0.0 for determinism, except gpt-5 models, which reject
/// temperature 0 and require 1.0.
fn temperature_for(model: &str) -> f32 {
    if model.contains("gpt-5") {
        1.0
    } else {
        0.0
    }
}

/// Append schema-derived output-format instructions unless the prompt
/// already carries its own JSON formatting directions.
fn assemble_system_prompt(system_prompt: &str, output_schema: &Value) -> String {
    if has_output_format_instructions(system_prompt) {
        return system_prompt.to_string();
    }
    format!(
        "{}\n\n{}",
        system_prompt.trim_end(),
        schema_instruction_block(output_schema)
    )
}

fn has_output_format_instructions(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    lower.contains("respond with json")
        || lower.contains("respond in json")
        || (lower.contains("json") && lower.contains("format"))
}

/// Derive an instruction block from the expected output schema's fields.
fn schema_instruction_block(schema: &Value) -> String {
    let mut lines = vec!["Respond with JSON only, containing these fields:".to_string()];

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, field_schema) in properties {
            let line = match field.as_str() {
                "flagged" => {
                    "- \"flagged\": boolean, true if the content violates the policy".to_string()
                }
                "confidence" => {
                    "- \"confidence\": number between 0.0 and 1.0".to_string()
                }
                "reason" => {
                    "- \"reason\": short explanation of the judgment".to_string()
                }
                _ => {
                    let type_name = field_schema
                        .get("type")
                        .map(describe_schema_type)
                        .unwrap_or_else(|| "value".to_string());
                    format!("- \"{}\": {}", field, type_name)
                }
            };
            lines.push(line);
        }
    }

    lines.push(String::new());
    lines.push(
        "Confidence calibration: 1.0 means certain the content is violative, \
         0.0 means certain it is not violative."
            .to_string(),
    );
    lines.join("\n")
}

fn describe_schema_type(type_value: &Value) -> String {
    match type_value {
        Value::String(s) => s.clone(),
        // Nullable fields come through as ["string", "null"].
        Value::Array(options) => options
            .iter()
            .filter_map(Value::as_str)
            .filter(|t| *t != "null")
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "value".to_string(),
    }
}

/// Strip a single Markdown code-fence wrapper if present.
pub(crate) fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop a language tag on the opening fence line ("json" typically).
    match body.split_once('\n') {
        Some((first_line, remainder)) if first_line.trim().chars().all(char::is_alphanumeric) => {
            remainder.trim()
        }
        _ => body.trim(),
    }
}

pub(crate) fn validate_against_schema(
    data: &Value,
    schema: &Value,
) -> std::result::Result<(), Vec<String>> {
    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(c) => c,
        Err(e) => return Err(vec![format!("schema compilation failed: {}", e)]),
    };
    let result = compiled.validate(data);
    match result {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect()),
    }
}
