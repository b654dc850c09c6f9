// crates/lineage-core/src/runtime/gate.rs
// ============================================================================
// Module: Lineage Resolution Gate
// Description: Per-key exclusive ownership with bounded acquisition.
// Purpose: Serialize resolution decisions for one IP lineage at a time.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The gate hands out exclusive ownership of a [`GateKey`]. Requests for the
//! same key queue on a per-key condition variable; requests for other keys
//! never wait on each other. Ownership is released when the [`GateGuard`]
//! drops, and key entries are removed once nobody holds or waits on them so
//! the key table stays proportional to in-flight requests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

// ============================================================================
// SECTION: Keys and Errors
// ============================================================================

/// Key owned exclusively while a resolution decision is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateKey(String);

impl GateKey {
    /// Key covering every decision for one IP lineage.
    #[must_use]
    pub fn lineage(ip: &str) -> Self {
        Self(ip.to_string())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Gate acquisition errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Ownership was not obtained before the deadline.
    #[error("gate acquisition for {key} timed out after {waited_ms} ms")]
    Timeout {
        /// Contended key.
        key: GateKey,
        /// Time spent waiting in milliseconds.
        waited_ms: u128,
    },
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Ownership state for one key.
#[derive(Debug, Default)]
struct GateEntry {
    /// True while a guard holds the key.
    held: Mutex<bool>,
    /// Signalled when the holder releases the key.
    released: Condvar,
}

/// Per-key lock set shared by every resolution request.
#[derive(Debug, Clone, Default)]
pub struct ResolutionGate {
    /// Entries for keys that are held or awaited.
    entries: Arc<Mutex<HashMap<GateKey, Arc<GateEntry>>>>,
}

impl ResolutionGate {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires exclusive ownership of `key`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Timeout`] when the key stays owned past the
    /// deadline.
    pub fn acquire(&self, key: GateKey, timeout: Duration) -> Result<GateGuard, GateError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let entry = {
            // Table state stays consistent across panics; no lock is held
            // while callers run.
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.clone()).or_default())
        };
        if wait_for_release(&entry, deadline) {
            return Ok(GateGuard {
                gate: self.clone(),
                key,
                entry,
            });
        }
        self.forget_if_idle(&key, &entry);
        Err(GateError::Timeout {
            key,
            waited_ms: started.elapsed().as_millis(),
        })
    }

    /// Returns the number of keys currently held or awaited.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops the table entry for `key` when the caller holds the last outside reference.
    fn forget_if_idle(&self, key: &GateKey, entry: &Arc<GateEntry>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // The table and the caller account for two references.
        if Arc::strong_count(entry) == 2
            && entries.get(key).is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(key);
        }
        drop(entries);
    }
}

/// Waits until `entry` is free and claims it; false on deadline expiry.
fn wait_for_release(entry: &GateEntry, deadline: Option<Instant>) -> bool {
    let mut held = entry.held.lock().unwrap_or_else(PoisonError::into_inner);
    while *held {
        held = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                let wait_for = deadline.saturating_duration_since(now);
                entry
                    .released
                    .wait_timeout(held, wait_for)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => entry.released.wait(held).unwrap_or_else(PoisonError::into_inner),
        };
    }
    *held = true;
    drop(held);
    true
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Exclusive ownership of a [`GateKey`]; released on drop.
#[derive(Debug)]
pub struct GateGuard {
    /// Gate that issued the guard.
    gate: ResolutionGate,
    /// Owned key.
    key: GateKey,
    /// Entry for the owned key.
    entry: Arc<GateEntry>,
}

impl GateGuard {
    /// Returns the owned key.
    #[must_use]
    pub const fn key(&self) -> &GateKey {
        &self.key
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        {
            let mut held = self.entry.held.lock().unwrap_or_else(PoisonError::into_inner);
            *held = false;
        }
        self.entry.released.notify_one();
        self.gate.forget_if_idle(&self.key, &self.entry);
    }
}
