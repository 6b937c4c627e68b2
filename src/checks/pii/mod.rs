//! PII detection and redaction.
//!
//! Detection runs over a normalized copy of the input (NFKC plus zero-width
//! stripping) so visually-identical but differently-encoded PII cannot evade
//! the patterns. Matches become replacement spans; overlapping spans are
//! resolved by priority, then length, then position; accepted spans are
//! applied left-to-right with a running offset.

pub mod encoded;
pub mod patterns;

pub use patterns::EntityType;

use crate::context::GuardrailContext;
use crate::registry::{self, CheckDefinition, CheckFn, Engine};
use crate::telemetry;
use crate::types::GuardrailResult;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PiiConfig {
    /// Entity types to detect. Defaults to every supported type except the
    /// deprecated NRP and PERSON heuristics.
    #[serde(default = "EntityType::default_set")]
    pub entities: Vec<EntityType>,
    /// Trip the wire when any entity is found. When false the check only
    /// redacts and reports.
    #[serde(default)]
    pub block: bool,
    /// Also scan base64/hex/percent-encoded payloads for hidden PII.
    #[serde(default)]
    pub detect_encoded_pii: bool,
}

/// A replacement candidate over the normalized text. `priority` 2 for plain
/// matches, 1 for encoded regions; higher wins at overlap.
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    replacement: String,
    priority: u8,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone)]
struct PlainMatch {
    entity: EntityType,
    start: usize,
    end: usize,
    value: String,
}

pub async fn pii_check(
    _ctx: &GuardrailContext,
    input: &str,
    config: Value,
) -> Result<GuardrailResult> {
    let config: PiiConfig = registry::typed_config("pii", &config)?;

    if input.is_empty() {
        return Err(Error::input_validation(
            "PII check requires non-empty text",
        ));
    }

    for entity in &config.entities {
        if entity.is_deprecated() {
            telemetry::warn_deprecated_entity(entity.label(), entity.deprecation_reason());
        }
    }

    let normalized = normalize(input);

    let mut findings: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    let mut spans: Vec<Span> = Vec::new();

    for m in detect_plain(&normalized, &config.entities) {
        let values = findings.entry(m.entity.label()).or_default();
        if !values.contains(&m.value) {
            values.push(m.value.clone());
        }
        spans.push(Span {
            start: m.start,
            end: m.end,
            replacement: format!("<{}>", m.entity.label()),
            priority: 2,
        });
    }

    if config.detect_encoded_pii {
        for candidate in encoded::find_candidates(&normalized) {
            let inner = detect_plain(&candidate.decoded, &config.entities);
            if inner.is_empty() {
                continue;
            }
            // Label is the first configured entity that matched inside the
            // decoded payload, so callers can rank entities by ordering them.
            let label = config
                .entities
                .iter()
                .find(|e| inner.iter().any(|m| m.entity == **e))
                .map(|e| e.label())
                .unwrap_or("PII");
            for m in &inner {
                let values = findings.entry(m.entity.label()).or_default();
                if !values.contains(&m.value) {
                    values.push(m.value.clone());
                }
            }
            spans.push(Span {
                start: candidate.start,
                end: candidate.end,
                replacement: format!("<{}_ENCODED>", label),
                priority: 1,
            });
        }
    }

    let any_found = !findings.is_empty();
    let checked_text = if any_found {
        redact(&normalized, resolve_conflicts(spans))
    } else {
        input.to_string()
    };

    let detected: Map<String, Value> = findings
        .into_iter()
        .map(|(label, values)| (label.to_string(), json!(values)))
        .collect();

    Ok(GuardrailResult::new(config.block && any_found, checked_text)
        .with_info("detected_entities", Value::Object(detected))
        .with_info("pii_detected", json!(any_found)))
}

/// NFKC normalization plus zero-width character stripping.
fn normalize(text: &str) -> String {
    text.nfkc()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        .collect()
}

fn detect_plain(text: &str, entities: &[EntityType]) -> Vec<PlainMatch> {
    let mut seen: HashSet<(EntityType, usize, usize)> = HashSet::new();
    let mut matches = Vec::new();

    for &entity in entities {
        for pattern in patterns::patterns_for(entity) {
            for caps in pattern.regex.captures_iter(text) {
                let Some(m) = caps.get(pattern.group) else {
                    continue;
                };
                if entity == EntityType::CreditCard && !patterns::luhn_valid(m.as_str()) {
                    continue;
                }
                if seen.insert((entity, m.start(), m.end())) {
                    matches.push(PlainMatch {
                        entity,
                        start: m.start(),
                        end: m.end(),
                        value: m.as_str().to_string(),
                    });
                }
            }
        }
    }

    matches
}

/// Sort by priority, then matched length, then start offset, and greedily
/// accept spans that do not overlap an already-accepted one.
fn resolve_conflicts(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.len().cmp(&a.len()))
            .then(a.start.cmp(&b.start))
    });

    let mut accepted: Vec<Span> = Vec::new();
    for span in spans {
        if accepted.iter().all(|a| !a.overlaps(&span)) {
            accepted.push(span);
        }
    }
    accepted
}

fn redact(text: &str, mut accepted: Vec<Span>) -> String {
    accepted.sort_by_key(|s| s.start);

    let mut out = text.to_string();
    let mut offset: isize = 0;
    for span in accepted {
        let start = (span.start as isize + offset) as usize;
        let end = (span.end as isize + offset) as usize;
        out.replace_range(start..end, &span.replacement);
        offset += span.replacement.len() as isize - span.len() as isize;
    }
    out
}

pub fn definition() -> CheckDefinition {
    let check: CheckFn = Arc::new(|ctx, input, config| Box::pin(pii_check(ctx, input, config)));
    CheckDefinition::builder("pii", check)
        .description("Detects and redacts personally identifiable information")
        .config_schema(registry::schema_for::<PiiConfig>())
        .engine(Engine::Regex)
        .build()
}
