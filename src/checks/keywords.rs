//! Keyword filter: word-boundary-aware banned-term matching.

use crate::context::GuardrailContext;
use crate::registry::{self, CheckDefinition, CheckFn, Engine};
use crate::types::GuardrailResult;
use crate::Result;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct KeywordsConfig {
    /// Terms to match. Matching is case-insensitive and respects word
    /// boundaries: "orld" does not match inside "world".
    #[schemars(length(min = 1))]
    pub keywords: Vec<String>,
}

pub async fn keywords_check(
    _ctx: &GuardrailContext,
    input: &str,
    config: Value,
) -> Result<GuardrailResult> {
    let config: KeywordsConfig = registry::typed_config("keywords", &config)?;

    let mut matched = Vec::new();
    for keyword in &config.keywords {
        // Escaped literals always compile; a failure here is unreachable.
        let re = Regex::new(&boundary_pattern(keyword))
            .map_err(|e| crate::Error::runtime(format!("keyword pattern failed: {}", e)))?;
        if re.is_match(input) {
            matched.push(keyword.clone());
        }
    }

    Ok(GuardrailResult::new(!matched.is_empty(), input)
        .with_info("checked", json!(config.keywords))
        .with_info("matched", json!(matched)))
}

/// Case-insensitive literal pattern with `\b` anchors only at word-character
/// edges. A `\b` next to punctuation demands an adjacent word character, so
/// terms like "C++" could never match with unconditional anchors.
fn boundary_pattern(keyword: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = keyword.chars().next().map_or(false, is_word);
    let trail = keyword.chars().last().map_or(false, is_word);
    format!(
        "(?i){}{}{}",
        if lead { r"\b" } else { "" },
        regex::escape(keyword),
        if trail { r"\b" } else { "" },
    )
}

pub fn definition() -> CheckDefinition {
    let check: CheckFn = Arc::new(|ctx, input, config| {
        Box::pin(keywords_check(ctx, input, config))
    });
    CheckDefinition::builder("keywords", check)
        .description("Flags text containing configured banned keywords (word-boundary-aware)")
        .config_schema(registry::schema_for::<KeywordsConfig>())
        .engine(Engine::Regex)
        .build()
}
