use crate::types::GuardrailResult;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.entities", "bundle.input[2].name")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "registry", "pii_check")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the guardrails pipeline.
///
/// Configuration, context, and input errors surface eagerly to the caller.
/// Tripwire and execution-failure variants are raised by the stage runner
/// only when the caller's escalation switches request it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    /// The execution context does not provide a capability a check declared.
    #[error("Context validation error: check '{check}' requires capability '{capability}'")]
    ContextValidation { check: String, capability: String },

    /// Caller-contract violation on the input itself (e.g. empty text).
    #[error("Input validation error: {message}{}", format_context(.context))]
    InputValidation {
        message: String,
        context: ErrorContext,
    },

    /// A check positively identified a violation and the caller did not
    /// suppress tripwire escalation. Carries the first triggering result.
    #[error("Guardrail tripwire triggered by '{}'", .result.guardrail_name())]
    TripwireTriggered { result: GuardrailResult },

    /// A check could not complete its judgment and the caller opted into
    /// fail-closed escalation. Carries the first failing result.
    #[error("Guardrail execution failed in '{}': {}", .result.guardrail_name(), .result.error_message())]
    ExecutionFailed { result: GuardrailResult },

    #[error("Network transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn input_validation(msg: impl Into<String>) -> Self {
        Error::InputValidation {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn input_validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InputValidation {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::InputValidation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_renders_into_message() {
        let err = Error::configuration_with_context(
            "knowledge_source must start with 'vs_'",
            ErrorContext::new()
                .with_field_path("config.knowledge_source")
                .with_source("hallucination_check"),
        );
        let msg = err.to_string();
        assert!(msg.contains("knowledge_source"));
        assert!(msg.contains("field: config.knowledge_source"));
        assert!(msg.contains("source: hallucination_check"));
    }

    #[test]
    fn plain_errors_have_no_context() {
        let err = Error::Transport("connection refused".into());
        assert!(err.context().is_none());
    }
}
