// crates/lineage-core/src/conformance.rs
// ============================================================================
// Module: Lineage Store Conformance
// Description: Behavioral checks every identity store must pass.
// Purpose: Let any persistence engine prove it satisfies the store contract.
// Dependencies: crate::{interfaces, model, runtime}, thiserror
// ============================================================================

//! ## Overview
//! [`run_store_suite`] exercises an [`IdentityStore`] + [`IdentityHistory`]
//! implementation through the lookups, inserts, and ordering rules the match
//! engine depends on, then drives the engine over it through the reference
//! scenario. Each check receives a fresh, empty store from the caller's
//! factory. Store crates call the suite from their integration tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use thiserror::Error;

use crate::interfaces::IdentityHistory;
use crate::interfaces::IdentityStore;
use crate::interfaces::StoreError;
use crate::model::GroupId;
use crate::model::Identity;
use crate::model::Interaction;
use crate::model::NewIdentity;
use crate::model::Timestamp;
use crate::model::VisitId;
use crate::runtime::ManualClock;
use crate::runtime::MatchEngine;
use crate::runtime::MatchEngineConfig;
use crate::runtime::SequenceIdGenerator;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// A failed conformance check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conformance check `{check}` failed: {message}")]
pub struct ConformanceFailure {
    /// Name of the failing check.
    pub check: &'static str,
    /// Failure description.
    pub message: String,
}

/// Result type for individual checks.
type CheckResult = Result<(), ConformanceFailure>;

/// Fails `check` with `message` unless `condition` holds.
fn ensure(check: &'static str, condition: bool, message: impl Into<String>) -> CheckResult {
    if condition {
        Ok(())
    } else {
        Err(ConformanceFailure {
            check,
            message: message.into(),
        })
    }
}

/// Renders an optional row for failure messages.
fn describe(row: Option<&Identity>) -> String {
    row.map_or_else(
        || "no row".to_string(),
        |row| format!("row {} ({})", row.row_key, row.visit_id),
    )
}

/// Wraps an unexpected store error.
fn store_failure(check: &'static str) -> impl Fn(StoreError) -> ConformanceFailure {
    move |err| ConformanceFailure {
        check,
        message: err.to_string(),
    }
}

// ============================================================================
// SECTION: Suite
// ============================================================================

/// Runs every conformance check, building a fresh store per check.
///
/// # Errors
///
/// Returns the first [`ConformanceFailure`] encountered.
pub fn run_store_suite<S, F>(mut make_store: F) -> Result<(), ConformanceFailure>
where
    S: IdentityStore + IdentityHistory,
    F: FnMut() -> S,
{
    check_empty_store(&make_store())?;
    check_latest_by_created_at(&make_store())?;
    check_row_key_tie_break(&make_store())?;
    check_window_bounds(&make_store())?;
    check_visit_id_conflict(&make_store())?;
    check_history_order(&make_store())?;
    check_reference_scenario(make_store())?;
    Ok(())
}

/// Builds a pending row.
fn row(ip: &str, provider: &str, application: &str, visit: &str, at: i64) -> NewIdentity {
    NewIdentity {
        group_id: GroupId::new("group-conformance"),
        visit_id: VisitId::new(visit),
        ip: ip.to_string(),
        provider: provider.to_string(),
        application: application.to_string(),
        created_at: Timestamp::from_unix_millis(at),
    }
}

/// Inserts a row, failing `check` on any store error.
fn put<S: IdentityStore>(
    store: &S,
    check: &'static str,
    row: NewIdentity,
) -> Result<Identity, ConformanceFailure> {
    store.insert(row).map_err(store_failure(check))
}

/// Lookups on an empty store return nothing.
fn check_empty_store<S: IdentityStore + IdentityHistory>(store: &S) -> CheckResult {
    let check = "empty_store";
    let latest = store.find_latest_by_ip("10.0.0.1").map_err(store_failure(check))?;
    ensure(check, latest.is_none(), "find_latest_by_ip returned a row")?;
    let windowed = store
        .find_latest_within_window("10.0.0.1", "p1", "a1", Timestamp::from_unix_millis(0))
        .map_err(store_failure(check))?;
    ensure(check, windowed.is_none(), "find_latest_within_window returned a row")?;
    let history = store.history("10.0.0.1").map_err(store_failure(check))?;
    ensure(check, history.is_empty(), "history returned rows")
}

/// Recency follows `created_at`, not insertion order, and is scoped by IP.
fn check_latest_by_created_at<S: IdentityStore>(store: &S) -> CheckResult {
    let check = "latest_by_created_at";
    let newer = put(store, check, row("10.0.0.1", "p1", "a1", "v-newer", 2_000))?;
    let older = put(store, check, row("10.0.0.1", "p2", "a2", "v-older", 1_000))?;
    put(store, check, row("10.0.0.2", "p1", "a1", "v-other", 9_000))?;
    ensure(check, older.row_key > newer.row_key, "row keys must increase with insertion order")?;
    let latest = store.find_latest_by_ip("10.0.0.1").map_err(store_failure(check))?;
    ensure(
        check,
        latest.as_ref().map(|row| &row.visit_id) == Some(&newer.visit_id),
        format!("expected {}, got {}", newer.visit_id, describe(latest.as_ref())),
    )
}

/// Equal `created_at` values resolve to the highest `row_key`.
fn check_row_key_tie_break<S: IdentityStore>(store: &S) -> CheckResult {
    let check = "row_key_tie_break";
    put(store, check, row("10.0.0.1", "p1", "a1", "v-first", 5_000))?;
    let second = put(store, check, row("10.0.0.1", "p1", "a1", "v-second", 5_000))?;
    let latest = store.find_latest_by_ip("10.0.0.1").map_err(store_failure(check))?;
    ensure(
        check,
        latest.as_ref() == Some(&second),
        format!("level-1 tie expected {}, got {}", second.visit_id, describe(latest.as_ref())),
    )?;
    let windowed = store
        .find_latest_within_window("10.0.0.1", "p1", "a1", Timestamp::from_unix_millis(5_000))
        .map_err(store_failure(check))?;
    ensure(
        check,
        windowed.as_ref() == Some(&second),
        format!("level-2 tie expected {}, got {}", second.visit_id, describe(windowed.as_ref())),
    )
}

/// The window bound is inclusive and the full triple must match.
fn check_window_bounds<S: IdentityStore>(store: &S) -> CheckResult {
    let check = "window_bounds";
    let at_bound = put(store, check, row("10.0.0.1", "p1", "a1", "v-bound", 10_000))?;
    put(store, check, row("10.0.0.1", "p1", "a2", "v-other-app", 20_000))?;
    put(store, check, row("10.0.0.1", "p2", "a1", "v-other-provider", 20_000))?;

    let inclusive = store
        .find_latest_within_window("10.0.0.1", "p1", "a1", Timestamp::from_unix_millis(10_000))
        .map_err(store_failure(check))?;
    ensure(
        check,
        inclusive.as_ref() == Some(&at_bound),
        format!("row at not_before must match, got {}", describe(inclusive.as_ref())),
    )?;
    let expired = store
        .find_latest_within_window("10.0.0.1", "p1", "a1", Timestamp::from_unix_millis(10_001))
        .map_err(store_failure(check))?;
    ensure(
        check,
        expired.is_none(),
        format!("row before not_before matched: {}", describe(expired.as_ref())),
    )
}

/// Duplicate `visit_id` inserts fail with a conflict and write nothing.
fn check_visit_id_conflict<S: IdentityStore + IdentityHistory>(store: &S) -> CheckResult {
    let check = "visit_id_conflict";
    put(store, check, row("10.0.0.1", "p1", "a1", "v-dup", 1_000))?;
    let duplicate = store.insert(row("10.0.0.1", "p2", "a2", "v-dup", 2_000));
    let outcome = match &duplicate {
        Ok(inserted) => format!("inserted {}", inserted.visit_id),
        Err(err) => err.to_string(),
    };
    ensure(
        check,
        matches!(duplicate, Err(StoreError::Conflict(_))),
        format!("expected conflict, got {outcome}"),
    )?;
    let history = store.history("10.0.0.1").map_err(store_failure(check))?;
    ensure(
        check,
        history.len() == 1,
        format!("expected 1 row after conflict, got {}", history.len()),
    )
}

/// History lists one IP's rows in insertion order.
fn check_history_order<S: IdentityStore + IdentityHistory>(store: &S) -> CheckResult {
    let check = "history_order";
    put(store, check, row("10.0.0.1", "p1", "a1", "v-1", 3_000))?;
    put(store, check, row("10.0.0.9", "p1", "a1", "v-x", 3_500))?;
    put(store, check, row("10.0.0.1", "p1", "a1", "v-2", 1_000))?;
    let visits: Vec<String> = store
        .history("10.0.0.1")
        .map_err(store_failure(check))?
        .into_iter()
        .map(|row| row.visit_id.as_str().to_string())
        .collect();
    ensure(check, visits == ["v-1", "v-2"], format!("unexpected history [{}]", visits.join(", ")))
}

/// Drives the engine through the reference scenario over the store.
fn check_reference_scenario<S: IdentityStore + IdentityHistory>(store: S) -> CheckResult {
    let check = "reference_scenario";
    let clock = ManualClock::new(Timestamp::from_unix_millis(1_700_000_000_000));
    let engine = MatchEngine::new(
        store,
        SequenceIdGenerator::new("id"),
        clock.clone(),
        MatchEngineConfig::default(),
    );
    let resolve = |interaction: &Interaction| {
        engine.resolve(interaction).map_err(|err| ConformanceFailure {
            check,
            message: err.to_string(),
        })
    };
    let first = Interaction::new("10.0.0.1", "p1", "a1");
    let second = Interaction::new("10.0.0.1", "p2", "a2");

    let created = resolve(&first)?;
    ensure(check, created.created, "first resolution must create a row")?;
    let repeat = resolve(&first)?;
    ensure(check, !repeat.created, "repeat within window must reuse")?;
    ensure(check, repeat.summary() == created.summary(), "repeat must return the same ids")?;

    clock.advance(Duration::from_secs(5 * 60));
    let other = resolve(&second)?;
    ensure(check, other.created, "new triple must create a row")?;
    ensure(
        check,
        other.identity.group_id == created.identity.group_id,
        "new triple must keep the lineage group",
    )?;
    ensure(
        check,
        other.identity.visit_id != created.identity.visit_id,
        "new triple must get a new visit",
    )?;

    clock.advance(Duration::from_secs(3 * 60 * 60));
    let expired = resolve(&first)?;
    ensure(check, expired.created, "expired triple must create a row")?;
    ensure(
        check,
        expired.identity.group_id == created.identity.group_id,
        "expired triple must keep the lineage group",
    )?;
    ensure(
        check,
        expired.identity.created_at > created.identity.created_at,
        "expired triple must advance created_at",
    )?;

    let history = engine.store().history("10.0.0.1").map_err(store_failure(check))?;
    ensure(check, history.len() == 3, format!("expected 3 rows, got {}", history.len()))?;
    ensure(
        check,
        history.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at),
        "created_at must not decrease in insertion order",
    )
}
