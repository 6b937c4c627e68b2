//! # llm-guardrails
//!
//! 这是一个可插拔的 LLM 内容安全管线，在文本进出应用时执行可配置的检查。
//!
//! A pluggable content-safety pipeline for LLM applications. Text flowing
//! into and out of the application is classified against configurable checks
//! and every check reports a structured pass/fail verdict ("tripwire"),
//! aggregated per pipeline stage.
//!
//! ## Overview
//!
//! Checks come in two families: regex-engine detectors that run entirely
//! in-process (keyword filter, URL allow-list, PII detection with redaction)
//! and LLM-prompted detectors that consult a model (jailbreak, topical
//! drift, hallucination, prompt injection, custom policies). All checks of a
//! stage run concurrently and settle independently: a failing check becomes
//! a fail-open result instead of aborting its siblings.
//!
//! ## Core Philosophy
//!
//! - **Fail-open by default**: an internal error never blocks traffic; only
//!   an explicit verdict (or a provider content filter) trips the wire
//! - **Config-driven**: checks are resolved by name from a registry and
//!   their configuration is schema-validated before anything runs
//! - **Model-agnostic**: the LLM is an opaque collaborator behind the
//!   [`llm::LlmClient`] trait; any OpenAI-compatible endpoint works
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_guardrails::checks;
//! use llm_guardrails::bundle::PipelineBundles;
//! use llm_guardrails::context::GuardrailContext;
//! use llm_guardrails::runner::{run_pipeline, StageOptions};
//!
//! #[tokio::main]
//! async fn main() -> llm_guardrails::Result<()> {
//!     let bundles = PipelineBundles::from_json_str(
//!         r#"{"input": [{"name": "pii", "config": {"block": true}}]}"#,
//!     )?;
//!     let pipeline = bundles.instantiate(&checks::default_registry())?;
//!
//!     let ctx = GuardrailContext::new();
//!     let results = run_pipeline(
//!         &pipeline,
//!         "My SSN is 111-22-3333",
//!         &ctx,
//!         None,
//!         StageOptions::default(),
//!     )
//!     .await?;
//!
//!     println!("tripped: {}", results.tripwires_triggered());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`registry`] | Check definitions, configuration validation, name lookup |
//! | [`runner`] | Stage orchestration: concurrent settle-all execution |
//! | [`bundle`] | Pipeline configuration bundles (per-stage check lists) |
//! | [`checks`] | Built-in check catalogue (regex and LLM families) |
//! | [`context`] | Execution context and capability validation |
//! | [`conversation`] | Conversation normalization into a flat entry list |
//! | [`llm`] | LLM client trait, default HTTP client, check runner |
//! | [`types`] | Verdict types (`GuardrailResult`, stages, token usage) |
//! | [`telemetry`] | Process-wide deprecation warnings |

pub mod bundle;
pub mod checks;
pub mod context;
pub mod conversation;
pub mod llm;
pub mod registry;
pub mod runner;
pub mod telemetry;
pub mod types;

// Re-export main types for convenience
pub use bundle::{CheckSpec, ConfiguredPipeline, PipelineBundles};
pub use context::{Capability, ConversationHistoryProvider, GuardrailContext};
pub use registry::{CheckDefinition, CheckRegistry, ConfiguredCheck, Engine};
pub use runner::{run_pipeline, run_stage, StageOptions};
pub use types::{GuardrailResult, GuardrailResults, Stage, TokenUsage};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
