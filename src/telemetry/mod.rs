//! Process-wide telemetry collaborator.
//!
//! Owns the deprecation-warning dedup set so that high-false-positive PII
//! entities warn exactly once per process per entity name. Tests reset the
//! set through [`reset_deprecation_warnings`].

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::warn;

static WARNED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Emit a deprecation warning for `entity` at most once per process.
pub fn warn_deprecated_entity(entity: &str, reason: &str) {
    let mut warned = WARNED.lock().unwrap_or_else(|e| e.into_inner());
    if warned.insert(entity.to_string()) {
        warn!(entity, reason, "deprecated PII entity configured");
    }
}

/// Clear the dedup set. Test hook only; production code never calls this.
pub fn reset_deprecation_warnings() {
    WARNED
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
}

#[cfg(test)]
pub(crate) fn was_warned(entity: &str) -> bool {
    WARNED
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(entity)
}

// Serializes tests that touch the process-wide dedup set.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());
