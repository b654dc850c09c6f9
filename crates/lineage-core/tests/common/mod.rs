// crates/lineage-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Scripted stores, generators, and engine builders.
// Purpose: Drive the match engine through failure and contention paths.
// Dependencies: lineage-core
// ============================================================================

//! ## Overview
//! Fixtures wrap [`InMemoryIdentityStore`] so tests can inject store errors,
//! slow lookups, external writers, and blocked inserts while keeping real
//! row semantics underneath.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use lineage_core::IdentifierError;
use lineage_core::IdentifierGenerator;
use lineage_core::Identity;
use lineage_core::IdentityHistory;
use lineage_core::IdentityStore;
use lineage_core::InMemoryIdentityStore;
use lineage_core::ManualClock;
use lineage_core::MatchEngine;
use lineage_core::MatchEngineConfig;
use lineage_core::NewIdentity;
use lineage_core::SequenceIdGenerator;
use lineage_core::StoreError;
use lineage_core::Timestamp;

// ============================================================================
// SECTION: Engine Builders
// ============================================================================

/// Engine over a deterministic generator and a manual clock.
pub type TestEngine<S> = MatchEngine<S, SequenceIdGenerator, ManualClock>;

/// Fixed starting instant for manual clocks (2023-11-14T22:13:20Z).
pub const fn start() -> Timestamp {
    Timestamp::from_unix_millis(1_700_000_000_000)
}

pub fn engine<S: IdentityStore>(store: S, clock: &ManualClock) -> TestEngine<S> {
    engine_with(store, clock, MatchEngineConfig::default())
}

pub fn engine_with<S: IdentityStore>(
    store: S,
    clock: &ManualClock,
    config: MatchEngineConfig,
) -> TestEngine<S> {
    MatchEngine::new(store, SequenceIdGenerator::new("id"), clock.clone(), config)
}

// ============================================================================
// SECTION: Scripted Store
// ============================================================================

/// In-memory store with injectable failures and delays.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStore {
    pub inner: InMemoryIdentityStore,
    lookup_delay: Arc<Mutex<Duration>>,
    lookup_failure: Arc<Mutex<Option<StoreError>>>,
    insert_failures: Arc<Mutex<VecDeque<StoreError>>>,
    external_write: Arc<Mutex<Option<NewIdentity>>>,
    lookups: Arc<AtomicUsize>,
    inserts: Arc<AtomicUsize>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing row table without any scripted behavior.
    pub fn over(inner: InMemoryIdentityStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Sleeps for `delay` inside every lookup.
    pub fn with_lookup_delay(self, delay: Duration) -> Self {
        *self.lookup_delay.lock().unwrap() = delay;
        self
    }

    /// Fails every lookup with `error`.
    pub fn with_lookup_failure(self, error: StoreError) -> Self {
        *self.lookup_failure.lock().unwrap() = Some(error);
        self
    }

    /// Fails the next inserts with the queued errors, in order.
    pub fn with_insert_failures(self, errors: impl IntoIterator<Item = StoreError>) -> Self {
        self.insert_failures.lock().unwrap().extend(errors);
        self
    }

    /// Commits `row` as an external writer, then rejects the next insert as a conflict.
    pub fn with_external_write(self, row: NewIdentity) -> Self {
        *self.external_write.lock().unwrap() = Some(row);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    fn before_lookup(&self) -> Result<(), StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.lookup_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.lookup_failure.lock().unwrap().clone().map_or(Ok(()), Err)
    }
}

impl IdentityStore for ScriptedStore {
    fn find_latest_by_ip(&self, ip: &str) -> Result<Option<Identity>, StoreError> {
        self.before_lookup()?;
        self.inner.find_latest_by_ip(ip)
    }

    fn find_latest_within_window(
        &self,
        ip: &str,
        provider: &str,
        application: &str,
        not_before: Timestamp,
    ) -> Result<Option<Identity>, StoreError> {
        self.before_lookup()?;
        self.inner.find_latest_within_window(ip, provider, application, not_before)
    }

    fn insert(&self, identity: NewIdentity) -> Result<Identity, StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if let Some(external) = self.external_write.lock().unwrap().take() {
            self.inner.insert(external)?;
            return Err(StoreError::Conflict("external writer committed first".to_string()));
        }
        if let Some(error) = self.insert_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.inner.insert(identity)
    }
}

impl IdentityHistory for ScriptedStore {
    fn history(&self, ip: &str) -> Result<Vec<Identity>, StoreError> {
        self.inner.history(ip)
    }
}

// ============================================================================
// SECTION: Blocking Store
// ============================================================================

#[derive(Debug, Default)]
struct BlockState {
    blocked: bool,
    released: bool,
}

/// In-memory store whose inserts for one IP block until released.
#[derive(Debug, Clone)]
pub struct BlockingStore {
    pub inner: InMemoryIdentityStore,
    blocked_ip: String,
    state: Arc<(Mutex<BlockState>, Condvar)>,
}

impl BlockingStore {
    pub fn new(blocked_ip: &str) -> Self {
        Self {
            inner: InMemoryIdentityStore::new(),
            blocked_ip: blocked_ip.to_string(),
            state: Arc::new((Mutex::new(BlockState::default()), Condvar::new())),
        }
    }

    pub fn wait_until_blocked(&self, timeout: Duration) -> bool {
        let (lock, cv) = &*self.state;
        let deadline = Instant::now() + timeout;
        let mut guard = lock.lock().expect("blocking store mutex");
        while !guard.blocked {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait_for = deadline.saturating_duration_since(now);
            let (next_guard, _) = cv.wait_timeout(guard, wait_for).expect("blocking store wait");
            guard = next_guard;
        }
        true
    }

    pub fn release(&self) {
        let (lock, cv) = &*self.state;
        {
            let mut guard = lock.lock().expect("blocking store mutex");
            guard.released = true;
        }
        cv.notify_all();
    }
}

impl IdentityStore for BlockingStore {
    fn find_latest_by_ip(&self, ip: &str) -> Result<Option<Identity>, StoreError> {
        self.inner.find_latest_by_ip(ip)
    }

    fn find_latest_within_window(
        &self,
        ip: &str,
        provider: &str,
        application: &str,
        not_before: Timestamp,
    ) -> Result<Option<Identity>, StoreError> {
        self.inner.find_latest_within_window(ip, provider, application, not_before)
    }

    fn insert(&self, identity: NewIdentity) -> Result<Identity, StoreError> {
        if identity.ip == self.blocked_ip {
            let (lock, cv) = &*self.state;
            let mut guard = lock.lock().expect("blocking store mutex");
            if !guard.released {
                guard.blocked = true;
                cv.notify_all();
                while !guard.released {
                    guard = cv.wait(guard).expect("blocking store wait");
                }
            }
            drop(guard);
        }
        self.inner.insert(identity)
    }
}

// ============================================================================
// SECTION: Generators
// ============================================================================

/// Generator whose entropy source is always unavailable.
#[derive(Debug, Default)]
pub struct FailingGenerator {
    pub calls: AtomicUsize,
}

impl IdentifierGenerator for FailingGenerator {
    fn generate(&self) -> Result<String, IdentifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IdentifierError::EntropyUnavailable("getrandom: no entropy".to_string()))
    }
}
