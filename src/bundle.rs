//! Pipeline configuration bundles.
//!
//! A bundle lists `{name, config}` pairs per stage. Loading resolves each
//! name in a [`CheckRegistry`](crate::registry::CheckRegistry) and validates
//! the config against that definition's schema, producing a
//! [`ConfiguredPipeline`] ready for the stage runner.

use crate::registry::{CheckRegistry, ConfiguredCheck};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One check reference in a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

/// Per-stage check lists as loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineBundles {
    #[serde(default)]
    pub pre_flight: Vec<CheckSpec>,
    #[serde(default)]
    pub input: Vec<CheckSpec>,
    #[serde(default)]
    pub output: Vec<CheckSpec>,
}

impl PipelineBundles {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                format!("malformed pipeline bundle: {}", e),
                ErrorContext::new().with_source("bundle"),
            )
        })
    }

    /// Resolve and validate every check against the registry.
    pub fn instantiate(&self, registry: &CheckRegistry) -> Result<ConfiguredPipeline> {
        Ok(ConfiguredPipeline {
            pre_flight: instantiate_stage(registry, &self.pre_flight, "pre_flight")?,
            input: instantiate_stage(registry, &self.input, "input")?,
            output: instantiate_stage(registry, &self.output, "output")?,
        })
    }
}

fn instantiate_stage(
    registry: &CheckRegistry,
    specs: &[CheckSpec],
    stage: &str,
) -> Result<Vec<ConfiguredCheck>> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            registry
                .instantiate(&spec.name, spec.config.clone())
                .map_err(|e| match e {
                    Error::Configuration { message, mut context } => {
                        context.field_path = Some(format!("{}[{}]", stage, i));
                        Error::Configuration { message, context }
                    }
                    other => other,
                })
        })
        .collect()
}

/// Instantiated checks grouped by stage.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPipeline {
    pub pre_flight: Vec<ConfiguredCheck>,
    pub input: Vec<ConfiguredCheck>,
    pub output: Vec<ConfiguredCheck>,
}
