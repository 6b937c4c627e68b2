//! 内置检查目录 — 正则与 LLM 两类检测器的标准集合。
//!
//! Built-in check catalogue.
//!
//! Two families: regex-engine checks that run entirely in-process (keywords,
//! urls, pii) and LLM-prompted checks that call the configured model
//! (jailbreak, off_topic, custom_prompt, hallucination, prompt_injection).
//! [`default_registry`] registers them all; callers can overwrite any entry
//! by re-registering under the same name.

pub mod custom_prompt;
pub mod hallucination;
pub mod jailbreak;
pub mod keywords;
pub mod off_topic;
pub mod pii;
pub mod prompt_injection;
pub mod urls;

use crate::registry::CheckRegistry;

/// A registry pre-loaded with every built-in check.
pub fn default_registry() -> CheckRegistry {
    let mut registry = CheckRegistry::new();
    registry.register(keywords::definition());
    registry.register(urls::definition());
    registry.register(pii::definition());
    registry.register(jailbreak::definition());
    registry.register(off_topic::definition());
    registry.register(custom_prompt::definition());
    registry.register(hallucination::definition());
    registry.register(prompt_injection::definition());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_all_builtins() {
        let registry = default_registry();
        for name in [
            "keywords",
            "urls",
            "pii",
            "jailbreak",
            "off_topic",
            "custom_prompt",
            "hallucination",
            "prompt_injection",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin '{}'", name);
        }
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn llm_checks_declare_their_capability() {
        let registry = default_registry();
        for name in ["jailbreak", "off_topic", "custom_prompt", "prompt_injection"] {
            let def = registry.get(name).unwrap();
            assert!(
                !def.required_capabilities().is_empty(),
                "'{}' declares no capabilities",
                name
            );
        }
        assert!(registry
            .get("pii")
            .unwrap()
            .required_capabilities()
            .is_empty());
    }
}
