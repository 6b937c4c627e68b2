//! Execution context: the capability container checks run against.
//!
//! Capability requirements are declared per check definition and validated
//! explicitly when a configured check runs, producing a structured
//! [`Error::ContextValidation`](crate::Error::ContextValidation) naming the
//! missing capability instead of failing on property access deep inside a
//! check.

use crate::conversation::{self, NormalizedEntry};
use crate::llm::LlmClient;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Capabilities a check can declare as required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// A chat-completion-style LLM client.
    LlmClient,
    /// Access to the live conversation history.
    ConversationHistory,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::LlmClient => "llm_client",
            Capability::ConversationHistory => "conversation_history",
        }
    }
}

/// Zero-argument accessor returning the current conversation in any of the
/// tolerated raw shapes; normalized by the context on read.
pub trait ConversationHistoryProvider: Send + Sync {
    fn conversation_history(&self) -> Result<Value>;
}

/// Fixed history, used when the caller passes a conversation directly to the
/// stage runner and in tests.
pub struct StaticHistory(pub Value);

impl ConversationHistoryProvider for StaticHistory {
    fn conversation_history(&self) -> Result<Value> {
        Ok(self.0.clone())
    }
}

/// Capability container shared read-only across all concurrently-running
/// checks in a stage.
#[derive(Clone, Default)]
pub struct GuardrailContext {
    llm_client: Option<Arc<dyn LlmClient>>,
    history_provider: Option<Arc<dyn ConversationHistoryProvider>>,
}

impl GuardrailContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn with_history_provider(
        mut self,
        provider: Arc<dyn ConversationHistoryProvider>,
    ) -> Self {
        self.history_provider = Some(provider);
        self
    }

    /// Derive a context whose history is replaced by a fixed conversation.
    pub fn with_static_history(&self, conversation: Value) -> Self {
        let mut derived = self.clone();
        derived.history_provider = Some(Arc::new(StaticHistory(conversation)));
        derived
    }

    pub fn llm_client(&self) -> Option<&Arc<dyn LlmClient>> {
        self.llm_client.as_ref()
    }

    /// Get the LLM client or fail naming the requesting check.
    pub fn require_llm_client(&self, check: &str) -> Result<&Arc<dyn LlmClient>> {
        self.llm_client.as_ref().ok_or_else(|| Error::ContextValidation {
            check: check.to_string(),
            capability: Capability::LlmClient.as_str().to_string(),
        })
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::LlmClient => self.llm_client.is_some(),
            Capability::ConversationHistory => self.history_provider.is_some(),
        }
    }

    /// Validate that every declared capability is present.
    pub fn validate_requirements(&self, check: &str, requirements: &[Capability]) -> Result<()> {
        for capability in requirements {
            if !self.has(*capability) {
                return Err(Error::ContextValidation {
                    check: check.to_string(),
                    capability: capability.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fetch and normalize the conversation history. Defensive: a missing
    /// provider or a provider error yields an empty list, never an error.
    pub fn conversation_entries(&self) -> Vec<NormalizedEntry> {
        let Some(provider) = &self.history_provider else {
            return Vec::new();
        };
        match provider.conversation_history() {
            Ok(raw) => conversation::normalize_conversation(&raw),
            Err(e) => {
                debug!(error = %e, "conversation history provider failed; treating as empty");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for GuardrailContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailContext")
            .field("llm_client", &self.llm_client.is_some())
            .field("history_provider", &self.history_provider.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_capability_names_check_and_capability() {
        let ctx = GuardrailContext::new();
        let err = ctx
            .validate_requirements("jailbreak", &[Capability::LlmClient])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("jailbreak"));
        assert!(msg.contains("llm_client"));
    }

    #[test]
    fn history_errors_become_empty() {
        struct Failing;
        impl ConversationHistoryProvider for Failing {
            fn conversation_history(&self) -> Result<Value> {
                Err(Error::runtime("history store offline"))
            }
        }
        let ctx = GuardrailContext::new().with_history_provider(Arc::new(Failing));
        assert!(ctx.conversation_entries().is_empty());
    }

    #[test]
    fn static_history_normalizes_on_read() {
        let ctx = GuardrailContext::new()
            .with_static_history(json!([{"role": "user", "content": "hi"}]));
        let entries = ctx.conversation_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content.as_deref(), Some("hi"));
    }
}
