//! Core type definitions: verdicts, stages, and token accounting.

mod result;

pub use result::{GuardrailResult, GuardrailResults, Stage, TokenUsage};
