//! 检查注册表 — 按名称登记检查定义并在实例化时校验配置。
//!
//! Check registry.
//!
//! A name-keyed catalogue of check definitions. Registration overwrites by
//! name (last writer wins) so config-driven redefinition works; enumeration
//! order is unspecified and callers must not rely on it. Configuration is
//! validated against the definition's JSON schema at instantiation time, so
//! a bad config fails before any check ever runs.

use crate::context::{Capability, GuardrailContext};
use crate::types::GuardrailResult;
use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Which engine a check definition runs on. Free-form metadata for
/// catalogues and dashboards; the pipeline does not branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Engine {
    Llm,
    Regex,
    FileSearch,
}

/// Definition metadata.
#[derive(Debug, Clone, Copy)]
pub struct CheckMetadata {
    pub engine: Engine,
    pub uses_conversation_history: bool,
}

/// Boxed future returned by a check function.
pub type CheckFuture<'a> = BoxFuture<'a, Result<GuardrailResult>>;

/// The extension point every check implements: `(context, input, config)`.
/// Config arrives pre-validated against the definition's schema.
pub type CheckFn = Arc<
    dyn for<'a> Fn(&'a GuardrailContext, &'a str, Value) -> CheckFuture<'a> + Send + Sync,
>;

/// Immutable check definition.
#[derive(Clone)]
pub struct CheckDefinition {
    name: String,
    description: String,
    media_type: String,
    config_schema: Option<Value>,
    required_capabilities: Vec<Capability>,
    check_fn: CheckFn,
    metadata: CheckMetadata,
}

impl CheckDefinition {
    pub fn builder(name: impl Into<String>, check_fn: CheckFn) -> CheckDefinitionBuilder {
        CheckDefinitionBuilder {
            name: name.into(),
            description: String::new(),
            media_type: "text/plain".into(),
            config_schema: None,
            required_capabilities: Vec::new(),
            check_fn,
            metadata: CheckMetadata {
                engine: Engine::Regex,
                uses_conversation_history: false,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn config_schema(&self) -> Option<&Value> {
        self.config_schema.as_ref()
    }

    pub fn required_capabilities(&self) -> &[Capability] {
        &self.required_capabilities
    }

    pub fn metadata(&self) -> CheckMetadata {
        self.metadata
    }

    /// Bind a concrete configuration, validating it first. Invalid config
    /// fails here, never at run time.
    pub fn instantiate(self: &Arc<Self>, config: Value) -> Result<ConfiguredCheck> {
        // Checks with all-defaulted configs accept a missing config block.
        let config = if config.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            config
        };

        if let Some(schema) = &self.config_schema {
            validate_config(&self.name, &config, schema)?;
        }

        Ok(ConfiguredCheck {
            definition: Arc::clone(self),
            config,
        })
    }
}

impl std::fmt::Debug for CheckDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDefinition")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("engine", &self.metadata.engine)
            .finish()
    }
}

pub struct CheckDefinitionBuilder {
    name: String,
    description: String,
    media_type: String,
    config_schema: Option<Value>,
    required_capabilities: Vec<Capability>,
    check_fn: CheckFn,
    metadata: CheckMetadata,
}

impl CheckDefinitionBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn config_schema(mut self, schema: Value) -> Self {
        self.config_schema = Some(schema);
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.required_capabilities.push(capability);
        self
    }

    pub fn engine(mut self, engine: Engine) -> Self {
        self.metadata.engine = engine;
        self
    }

    pub fn uses_conversation_history(mut self, uses: bool) -> Self {
        self.metadata.uses_conversation_history = uses;
        self
    }

    pub fn build(self) -> CheckDefinition {
        CheckDefinition {
            name: self.name,
            description: self.description,
            media_type: self.media_type,
            config_schema: self.config_schema,
            required_capabilities: self.required_capabilities,
            check_fn: self.check_fn,
            metadata: self.metadata,
        }
    }
}

/// A definition bound to validated configuration. Stateless and reusable
/// across calls within a pipeline run.
#[derive(Clone)]
pub struct ConfiguredCheck {
    definition: Arc<CheckDefinition>,
    config: Value,
}

impl ConfiguredCheck {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Execute the check. Context capability requirements are validated
    /// before the check function runs.
    pub async fn run(&self, ctx: &GuardrailContext, input: &str) -> Result<GuardrailResult> {
        ctx.validate_requirements(
            self.definition.name(),
            self.definition.required_capabilities(),
        )?;
        (self.definition.check_fn)(ctx, input, self.config.clone()).await
    }
}

impl std::fmt::Debug for ConfiguredCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredCheck")
            .field("name", &self.definition.name())
            .finish()
    }
}

/// Name-keyed catalogue of check definitions, dependency-injected into the
/// pipeline builder rather than living in module-level state.
#[derive(Debug, Default, Clone)]
pub struct CheckRegistry {
    definitions: HashMap<String, Arc<CheckDefinition>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the definition keyed by its name. Overwriting is
    /// intentional: config-driven redefinition is a feature.
    pub fn register(&mut self, definition: CheckDefinition) {
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CheckDefinition>> {
        self.definitions.get(name)
    }

    /// All definitions, in unspecified order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<CheckDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Look up a definition and bind a configuration to it.
    pub fn instantiate(&self, name: &str, config: Value) -> Result<ConfiguredCheck> {
        let definition = self.get(name).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown check '{}'", name),
                ErrorContext::new().with_source("registry"),
            )
        })?;
        definition.instantiate(config)
    }
}

/// JSON Schema for a typed config or output struct.
pub fn schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::gen::SchemaSettings::default()
        .into_generator()
        .into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

/// Deserialize a pre-validated config value into its typed form.
pub fn typed_config<T: DeserializeOwned>(check: &str, config: &Value) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|e| {
        Error::configuration_with_context(
            format!("invalid configuration: {}", e),
            ErrorContext::new().with_source(check.to_string()),
        )
    })
}

fn validate_config(check: &str, config: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| {
        Error::configuration_with_context(
            format!("config schema for '{}' does not compile: {}", check, e),
            ErrorContext::new().with_source("registry"),
        )
    })?;

    if let Err(errors) = compiled.validate(config) {
        let issues: Vec<String> = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(Error::configuration_with_context(
            format!("invalid configuration for check '{}'", check),
            ErrorContext::new()
                .with_source("registry")
                .with_details(issues.join("; ")),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_check() -> CheckFn {
        Arc::new(|_ctx, input, _config| {
            let input = input.to_string();
            Box::pin(async move { Ok(GuardrailResult::new(false, input)) })
        })
    }

    #[derive(serde::Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct DemoConfig {
        threshold: f64,
    }

    #[test]
    fn registration_is_last_writer_wins() {
        let mut registry = CheckRegistry::new();
        registry.register(
            CheckDefinition::builder("demo", noop_check())
                .description("first")
                .build(),
        );
        registry.register(
            CheckDefinition::builder("demo", noop_check())
                .description("second")
                .build(),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("demo").unwrap().description(), "second");
    }

    #[test]
    fn invalid_config_fails_at_instantiation() {
        let mut registry = CheckRegistry::new();
        registry.register(
            CheckDefinition::builder("demo", noop_check())
                .config_schema(schema_for::<DemoConfig>())
                .build(),
        );

        let err = registry
            .instantiate("demo", json!({"threshold": "not a number"}))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = registry.instantiate("demo", json!({})).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        assert!(registry.instantiate("demo", json!({"threshold": 0.5})).is_ok());
    }

    #[test]
    fn unknown_check_is_a_configuration_error() {
        let registry = CheckRegistry::new();
        let err = registry.instantiate("missing", Value::Null).unwrap_err();
        assert!(err.to_string().contains("unknown check"));
    }

    #[tokio::test]
    async fn configured_check_runs_with_bound_config() {
        let check: CheckFn = Arc::new(|_ctx, input, config| {
            let input = input.to_string();
            Box::pin(async move {
                let threshold = config["threshold"].as_f64().unwrap_or(0.0);
                Ok(GuardrailResult::new(threshold > 0.5, input))
            })
        });
        let mut registry = CheckRegistry::new();
        registry.register(
            CheckDefinition::builder("demo", check)
                .config_schema(schema_for::<DemoConfig>())
                .build(),
        );

        let configured = registry.instantiate("demo", json!({"threshold": 0.9})).unwrap();
        let ctx = GuardrailContext::new();
        let result = configured.run(&ctx, "text").await.unwrap();
        assert!(result.tripwire_triggered);
    }
}
