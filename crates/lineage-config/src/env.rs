// crates/lineage-config/src/env.rs
// ============================================================================
// Module: Environment Overrides
// Description: Strict parsing of the environment variables the service reads.
// Purpose: Keep env handling fail-closed and injectable for tests.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Environment values are read through a lookup function so tests never touch
//! the process environment. Values must be valid UTF-8 and non-empty; anything
//! else fails closed instead of silently falling back to file values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;

use crate::config::ConfigError;

// ============================================================================
// SECTION: Environment Keys
// ============================================================================

/// Environment variables recognized by the configuration loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvOverride {
    /// Path to the configuration file.
    Config,
    /// Listen address override for `server.bind`.
    Bind,
    /// `SQLite` database path; selects the sqlite store.
    StorePath,
    /// Matching window override in minutes.
    MatchWindowMinutes,
}

impl EnvOverride {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "LINEAGE_CONFIG",
            Self::Bind => "LINEAGE_BIND",
            Self::StorePath => "LINEAGE_STORE_PATH",
            Self::MatchWindowMinutes => "LINEAGE_MATCH_WINDOW_MINUTES",
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the process environment.
#[must_use]
pub fn process_env(name: &str) -> Option<OsString> {
    std::env::var_os(name)
}

/// Reads a variable through `lookup`, rejecting non-UTF-8 and blank values.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the value is set but unusable.
pub fn read_nonempty<F>(lookup: &F, var: EnvOverride) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<OsString>,
{
    let name = var.as_str();
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let value = raw
        .into_string()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be valid UTF-8")))?;
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{name} must not be empty")));
    }
    Ok(Some(value.trim().to_string()))
}

/// Parses a strictly positive integer from an environment value.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the value is non-numeric or zero.
pub fn parse_positive(var: EnvOverride, raw: &str) -> Result<u64, ConfigError> {
    let name = var.as_str();
    let value: u64 = raw
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a positive integer")))?;
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use std::ffi::OsString;

    use super::EnvOverride;
    use super::parse_positive;
    use super::read_nonempty;

    #[test]
    fn unset_variable_reads_as_none() {
        let lookup = |_: &str| None;
        assert_eq!(read_nonempty(&lookup, EnvOverride::Bind).unwrap(), None);
    }

    #[test]
    fn blank_variable_fails_closed() {
        let lookup = |_: &str| Some(OsString::from("   "));
        let err = read_nonempty(&lookup, EnvOverride::Bind).unwrap_err();
        assert!(err.to_string().contains("LINEAGE_BIND must not be empty"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_variable_fails_closed() {
        use std::os::unix::ffi::OsStringExt;

        let lookup = |_: &str| Some(OsString::from_vec(vec![0x66, 0x6f, 0xff]));
        let err = read_nonempty(&lookup, EnvOverride::StorePath).unwrap_err();
        assert!(err.to_string().contains("LINEAGE_STORE_PATH must be valid UTF-8"));
    }

    #[test]
    fn positive_parse_rejects_zero_and_garbage() {
        assert_eq!(parse_positive(EnvOverride::MatchWindowMinutes, "45").unwrap(), 45);
        assert!(parse_positive(EnvOverride::MatchWindowMinutes, "0").is_err());
        assert!(parse_positive(EnvOverride::MatchWindowMinutes, "-3").is_err());
        assert!(parse_positive(EnvOverride::MatchWindowMinutes, "ten").is_err());
    }
}
