//! Tagged outcome of an LLM check call.
//!
//! The runner never lets a failure escape as a thrown error; every failure
//! mode is classified into an [`LlmExecutionError`] so callers branch on an
//! explicit discriminant instead of sniffing result shapes.

use serde_json::{Map, Value};

/// Result of one LLM check call.
#[derive(Debug, Clone)]
pub enum LlmOutcome {
    /// Parsed and schema-validated model output.
    Ok(Value),
    /// The call or the interpretation of its response failed.
    ExecutionError(LlmExecutionError),
}

impl LlmOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, LlmOutcome::Ok(_))
    }
}

/// Classified LLM failure. Fail-open (`flagged == false`) for every case
/// except an upstream content-filter rejection, which defers to the
/// provider's own safety judgment and flags the content.
#[derive(Debug, Clone)]
pub struct LlmExecutionError {
    pub message: String,
    pub flagged: bool,
    pub confidence: f64,
    /// Extra fields merged into the check result's `info`
    /// (e.g. `third_party_filter`, `schema_issues`).
    pub info: Map<String, Value>,
}

impl LlmExecutionError {
    /// Standard fail-open error.
    pub fn fail_open(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            flagged: false,
            confidence: 0.0,
            info: Map::new(),
        }
    }

    /// Provider-side content-filter rejection. The one fail-closed case:
    /// an upstream safety filter already judged the content unsafe.
    pub fn content_filter(message: impl Into<String>) -> Self {
        let mut info = Map::new();
        info.insert("third_party_filter".into(), Value::Bool(true));
        Self {
            message: message.into(),
            flagged: true,
            confidence: 1.0,
            info,
        }
    }

    /// Schema-validation failure, carrying the individual issues.
    pub fn schema_failure(issues: Vec<String>) -> Self {
        let mut err = Self::fail_open("LLM response validation failed.");
        err.info.insert(
            "schema_issues".into(),
            Value::Array(issues.into_iter().map(Value::String).collect()),
        );
        err
    }

    pub fn with_info(mut self, key: impl Into<String>, value: Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_filter_is_fail_closed() {
        let err = LlmExecutionError::content_filter("content_filter: rejected");
        assert!(err.flagged);
        assert_eq!(err.confidence, 1.0);
        assert_eq!(err.info.get("third_party_filter"), Some(&Value::Bool(true)));
    }

    #[test]
    fn other_failures_are_fail_open() {
        let err = LlmExecutionError::fail_open("timeout");
        assert!(!err.flagged);
        assert_eq!(err.confidence, 0.0);

        let err = LlmExecutionError::schema_failure(vec!["flagged: missing".into()]);
        assert!(!err.flagged);
        assert!(err.info.contains_key("schema_issues"));
    }
}
