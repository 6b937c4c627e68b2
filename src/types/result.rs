//! Guardrail verdict types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pipeline position where a set of checks runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreFlight,
    Input,
    Output,
}

impl Stage {
    /// String form used for result tagging and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreFlight => "pre_flight",
            Stage::Input => "input",
            Stage::Output => "output",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage snapshot captured immediately after an LLM call,
/// independent of downstream parse success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Set when the provider returned no usage block (or no call was made).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
}

impl TokenUsage {
    pub fn available(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(total),
            unavailable_reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            unavailable_reason: Some(reason.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.total_tokens.is_some()
    }
}

/// The universal output record of a single check execution.
///
/// `info` always carries `checked_text`, reflecting any transformation the
/// check performed (PII masking) or the original text if unmodified. The
/// stage runner stamps `guardrail_name` and `stage_name` before returning
/// results to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub tripwire_triggered: bool,
    /// The check ran but could not complete its judgment. Fail-open:
    /// `execution_failed == true` implies `tripwire_triggered == false`
    /// unless the caller opted into fail-closed re-raising.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub execution_failed: bool,
    /// Stringified original error, preserved so a strict-mode caller can
    /// re-raise it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    pub info: Map<String, Value>,
}

impl GuardrailResult {
    /// A completed check verdict.
    pub fn new(tripwire_triggered: bool, checked_text: impl Into<String>) -> Self {
        let mut info = Map::new();
        info.insert("checked_text".into(), Value::String(checked_text.into()));
        Self {
            tripwire_triggered,
            execution_failed: false,
            original_error: None,
            info,
        }
    }

    /// Synthetic result for a check whose execution raised an error.
    pub fn execution_failure(checked_text: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::new(false, checked_text);
        result.execution_failed = true;
        result.info.insert("error".into(), Value::String(error.clone()));
        result.original_error = Some(error);
        result
    }

    /// Attach an arbitrary info field (builder style).
    pub fn with_info(mut self, key: impl Into<String>, value: Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }

    /// Merge a whole object of check-specific fields into `info`.
    pub fn with_info_map(mut self, map: Map<String, Value>) -> Self {
        self.info.extend(map);
        self
    }

    pub fn checked_text(&self) -> &str {
        self.info
            .get("checked_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn guardrail_name(&self) -> &str {
        self.info
            .get("guardrail_name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
    }

    pub fn stage_name(&self) -> Option<&str> {
        self.info.get("stage_name").and_then(Value::as_str)
    }

    pub fn error_message(&self) -> &str {
        self.original_error.as_deref().unwrap_or("unknown error")
    }

    /// Stamp orchestration metadata. Called by the stage runner on every
    /// result, including synthetic failures.
    pub(crate) fn tag(&mut self, stage: Stage, guardrail_name: &str) {
        self.info.insert(
            "guardrail_name".into(),
            Value::String(guardrail_name.to_string()),
        );
        self.info
            .insert("stage_name".into(), Value::String(stage.as_str().to_string()));
    }
}

/// Aggregated results across the three pipeline stages.
///
/// Derived views (`all_results`, `tripwires_triggered`, `triggered_results`)
/// are computed from the stage vectors, never stored redundantly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailResults {
    pub preflight: Vec<GuardrailResult>,
    pub input: Vec<GuardrailResult>,
    pub output: Vec<GuardrailResult>,
}

impl GuardrailResults {
    pub fn all_results(&self) -> impl Iterator<Item = &GuardrailResult> {
        self.preflight
            .iter()
            .chain(self.input.iter())
            .chain(self.output.iter())
    }

    /// OR across every result in every stage.
    pub fn tripwires_triggered(&self) -> bool {
        self.all_results().any(|r| r.tripwire_triggered)
    }

    pub fn triggered_results(&self) -> Vec<&GuardrailResult> {
        self.all_results()
            .filter(|r| r.tripwire_triggered)
            .collect()
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut Vec<GuardrailResult> {
        match stage {
            Stage::PreFlight => &mut self.preflight,
            Stage::Input => &mut self.input,
            Stage::Output => &mut self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checked_text_always_present() {
        let r = GuardrailResult::new(false, "hello");
        assert_eq!(r.checked_text(), "hello");
        assert!(!r.execution_failed);
    }

    #[test]
    fn execution_failure_is_fail_open() {
        let r = GuardrailResult::execution_failure("text", "boom");
        assert!(!r.tripwire_triggered);
        assert!(r.execution_failed);
        assert_eq!(r.error_message(), "boom");
        assert_eq!(r.info.get("error"), Some(&json!("boom")));
    }

    #[test]
    fn tagging_stamps_stage_and_name() {
        let mut r = GuardrailResult::new(true, "x");
        r.tag(Stage::PreFlight, "pii");
        assert_eq!(r.guardrail_name(), "pii");
        assert_eq!(r.stage_name(), Some("pre_flight"));
    }

    #[test]
    fn aggregate_views_are_derived() {
        let mut results = GuardrailResults::default();
        results.input.push(GuardrailResult::new(false, "a"));
        results.output.push(GuardrailResult::new(true, "b"));
        assert_eq!(results.all_results().count(), 2);
        assert!(results.tripwires_triggered());
        assert_eq!(results.triggered_results().len(), 1);
        assert_eq!(results.triggered_results()[0].checked_text(), "b");
    }

    #[test]
    fn token_usage_serializes_compactly() {
        let usage = TokenUsage::unavailable("no call made");
        let v = serde_json::to_value(&usage).unwrap();
        assert_eq!(v, json!({"unavailable_reason": "no call made"}));
    }
}
