// crates/lineage-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for lineage-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::collections::BTreeMap;
use std::ffi::OsString;

use lineage_config::ConfigError;
use lineage_config::LineageConfig;

/// Shared result type for config tests.
pub type TestResult = Result<(), String>;

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<LineageConfig, ConfigError> {
    LineageConfig::parse("")
}

/// Asserts `result` is an error whose message contains `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

/// Builds an environment lookup backed by a fixed map.
pub fn env_of(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> + use<> {
    let map: BTreeMap<String, OsString> = entries
        .iter()
        .map(|(name, value)| ((*name).to_string(), OsString::from(*value)))
        .collect();
    move |name: &str| map.get(name).cloned()
}
