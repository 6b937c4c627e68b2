//! Stage orchestration.
//!
//! Runs every configured check for one pipeline stage concurrently against
//! one text/context and produces stage-tagged results. Checks settle
//! independently: one check's failure is converted into a synthetic
//! fail-open result rather than aborting the stage, and no check is
//! cancelled when a sibling trips.

use crate::bundle::ConfiguredPipeline;
use crate::context::GuardrailContext;
use crate::registry::ConfiguredCheck;
use crate::types::{GuardrailResult, GuardrailResults, Stage};
use crate::{Error, Result};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

/// Escalation switches for a stage run.
///
/// By default a triggered tripwire raises after all checks complete;
/// suppression must be requested explicitly to get silent aggregation.
/// Execution failures aggregate silently unless `raise_on_execution_error`
/// opts into fail-closed escalation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    pub suppress_tripwire: bool,
    pub raise_on_execution_error: bool,
}

/// Execute every check of one stage concurrently.
///
/// All checks run to completion before any escalation scan; results are
/// collected in check order and stamped with `stage_name`/`guardrail_name`.
pub async fn run_stage(
    stage: Stage,
    checks: &[ConfiguredCheck],
    text: &str,
    ctx: &GuardrailContext,
    conversation: Option<&Value>,
    options: StageOptions,
) -> Result<Vec<GuardrailResult>> {
    // A conversation supplied directly to the stage overrides the context's
    // own history provider for the duration of this run.
    let derived;
    let ctx = match conversation {
        Some(raw) => {
            derived = ctx.with_static_history(raw.clone());
            &derived
        }
        None => ctx,
    };

    let futures = checks.iter().map(|check| async move {
        let outcome = check.run(ctx, text).await;
        (check.name().to_string(), outcome)
    });

    let mut results = Vec::with_capacity(checks.len());
    for (name, outcome) in join_all(futures).await {
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(check = %name, error = %e, "check execution failed; converting to fail-open result");
                GuardrailResult::execution_failure(text, e.to_string())
            }
        };
        result.tag(stage, &name);
        results.push(result);
    }

    if options.raise_on_execution_error {
        if let Some(failed) = results.iter().find(|r| r.execution_failed) {
            return Err(Error::ExecutionFailed {
                result: failed.clone(),
            });
        }
    }

    if !options.suppress_tripwire {
        if let Some(triggered) = results.iter().find(|r| r.tripwire_triggered) {
            debug!(
                stage = %stage,
                check = triggered.guardrail_name(),
                "tripwire triggered"
            );
            return Err(Error::TripwireTriggered {
                result: triggered.clone(),
            });
        }
    }

    Ok(results)
}

/// Run all three stages of a configured pipeline against one text and
/// aggregate the results. Stage order is pre-flight, input, output; a raised
/// tripwire or escalated failure stops subsequent stages.
pub async fn run_pipeline(
    pipeline: &ConfiguredPipeline,
    text: &str,
    ctx: &GuardrailContext,
    conversation: Option<&Value>,
    options: StageOptions,
) -> Result<GuardrailResults> {
    let mut results = GuardrailResults::default();
    for (stage, checks) in [
        (Stage::PreFlight, &pipeline.pre_flight),
        (Stage::Input, &pipeline.input),
        (Stage::Output, &pipeline.output),
    ] {
        if checks.is_empty() {
            continue;
        }
        let stage_results = run_stage(stage, checks, text, ctx, conversation, options).await?;
        *results.stage_mut(stage) = stage_results;
    }
    Ok(results)
}
