// crates/lineage-core/tests/engine_concurrency.rs
// ============================================================================
// Module: Match Engine Concurrency Tests
// Description: Per-IP serialization under concurrent resolution.
// Purpose: Validate single-group lineages, bounded gate waits, and isolation.
// ============================================================================

//! ## Overview
//! Multi-threaded tests for the resolution gate and engine:
//! - Concurrent first-seen requests for one IP create exactly one group
//! - Distinct triples under one IP create exactly one row each
//! - Gate acquisition times out while another request holds the IP
//! - Unrelated IPs are never blocked by a held IP
//! - Gate key entries are released once requests finish

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use lineage_core::GateError;
use lineage_core::GateKey;
use lineage_core::IdentityHistory;
use lineage_core::Interaction;
use lineage_core::ManualClock;
use lineage_core::MatchEngine;
use lineage_core::MatchEngineConfig;
use lineage_core::RandomIdGenerator;
use lineage_core::ResolutionGate;
use lineage_core::ResolutionLevel;
use lineage_core::ResolveError;
use lineage_core::SystemClock;

use crate::common::BlockingStore;
use crate::common::ScriptedStore;
use crate::common::engine;
use crate::common::engine_with;
use crate::common::start;

const WORKERS: usize = 20;

// ============================================================================
// SECTION: Single Group Per Lineage
// ============================================================================

#[test]
fn concurrent_first_seen_requests_share_one_group() {
    let clock = ManualClock::new(start());
    // Slow lookups widen the check-then-insert window the gate must close.
    let store = ScriptedStore::new().with_lookup_delay(Duration::from_millis(2));
    let engine = Arc::new(engine(store.clone(), &clock));
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0 .. WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.resolve(&Interaction::new("203.0.113.7", "p1", "a1")).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let groups: BTreeSet<_> = results.iter().map(|r| r.identity.group_id.clone()).collect();
    let visits: BTreeSet<_> = results.iter().map(|r| r.identity.visit_id.clone()).collect();
    assert_eq!(groups.len(), 1);
    assert_eq!(visits.len(), 1);
    assert_eq!(results.iter().filter(|r| r.created).count(), 1);
    assert_eq!(store.history("203.0.113.7").unwrap().len(), 1);
    assert_eq!(engine.gate().active_keys(), 0);
}

#[test]
fn concurrent_distinct_triples_create_one_row_each() {
    let store = ScriptedStore::new().with_lookup_delay(Duration::from_millis(1));
    let engine = Arc::new(MatchEngine::new(
        store.clone(),
        RandomIdGenerator,
        SystemClock,
        MatchEngineConfig::default(),
    ));
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0 .. WORKERS)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let triple = worker % 4;
                let interaction =
                    Interaction::new("198.51.100.4", format!("p{triple}"), format!("a{triple}"));
                barrier.wait();
                engine.resolve(&interaction).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let groups: BTreeSet<_> = results.iter().map(|r| r.identity.group_id.clone()).collect();
    assert_eq!(groups.len(), 1);
    assert_eq!(results.iter().filter(|r| r.created).count(), 4);
    let rows = store.history("198.51.100.4").unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[test]
fn concurrent_distinct_ips_do_not_share_groups() {
    let clock = ManualClock::new(start());
    let store = ScriptedStore::new();
    let engine = Arc::new(engine(store.clone(), &clock));

    let handles: Vec<_> = (0 .. WORKERS)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.resolve(&Interaction::new(format!("10.1.0.{worker}"), "p", "a")).unwrap()
            })
        })
        .collect();
    let groups: BTreeSet<_> =
        handles.into_iter().map(|handle| handle.join().unwrap().identity.group_id).collect();
    assert_eq!(groups.len(), WORKERS);
    assert_eq!(store.inner.len().unwrap(), WORKERS);
}

// ============================================================================
// SECTION: Bounded Waits and Isolation
// ============================================================================

#[test]
fn held_ip_times_out_waiters_without_blocking_other_ips() {
    let clock = ManualClock::new(start());
    let store = BlockingStore::new("10.9.9.9");
    let config = MatchEngineConfig {
        gate_timeout: Duration::from_millis(50),
        ..MatchEngineConfig::default()
    };
    let engine = Arc::new(engine_with(store.clone(), &clock, config));

    let holder = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.resolve(&Interaction::new("10.9.9.9", "p1", "a1")))
    };
    assert!(store.wait_until_blocked(Duration::from_secs(5)), "holder never reached insert");

    let started = Instant::now();
    let err = engine.resolve(&Interaction::new("10.9.9.9", "p2", "a2")).unwrap_err();
    assert!(matches!(err, ResolveError::Timeout { level: ResolutionLevel::Gate, .. }));
    assert!(started.elapsed() >= Duration::from_millis(50));

    let unrelated = engine.resolve(&Interaction::new("10.8.8.8", "p1", "a1")).unwrap();
    assert!(unrelated.created);

    store.release();
    let held = holder.join().unwrap().unwrap();
    assert!(held.created);
    assert_eq!(store.inner.len().unwrap(), 2);
    assert_eq!(engine.gate().active_keys(), 0);
}

#[test]
fn gate_serializes_holders_and_forgets_idle_keys() {
    let gate = ResolutionGate::new();
    let key = GateKey::lineage("10.0.0.1");
    let guard = gate.acquire(key.clone(), Duration::from_millis(10)).unwrap();
    assert_eq!(guard.key(), &key);
    assert_eq!(gate.active_keys(), 1);

    let err = gate.acquire(key.clone(), Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, GateError::Timeout { ref key, .. } if key.as_str() == "10.0.0.1"));
    assert_eq!(gate.active_keys(), 1);

    let other = gate.acquire(GateKey::lineage("10.0.0.2"), Duration::ZERO).unwrap();
    assert_eq!(gate.active_keys(), 2);
    drop(other);
    drop(guard);
    assert_eq!(gate.active_keys(), 0);

    let waiter = {
        let gate = gate.clone();
        let key = key.clone();
        let guard = gate.acquire(key.clone(), Duration::ZERO).unwrap();
        let handle = thread::spawn(move || gate.acquire(key, Duration::from_secs(5)).is_ok());
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        handle
    };
    assert!(waiter.join().unwrap());
    assert_eq!(gate.active_keys(), 0);
}
