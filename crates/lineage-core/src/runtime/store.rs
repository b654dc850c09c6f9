// crates/lineage-core/src/runtime/store.rs
// ============================================================================
// Module: Lineage In-Memory Stores
// Description: In-memory identity store and shared store wrapper.
// Purpose: Provide a reference store for tests and ephemeral deployments.
// Dependencies: crate::{interfaces, model}
// ============================================================================

//! ## Overview
//! [`InMemoryIdentityStore`] keeps rows in insertion order behind a mutex and
//! enforces `visit_id` uniqueness like a durable store would.
//! [`SharedIdentityStore`] erases the backend type so servers and tools can
//! hold any [`IdentityBackend`] behind one handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::interfaces::IdentityBackend;
use crate::interfaces::IdentityHistory;
use crate::interfaces::IdentityStore;
use crate::interfaces::StoreError;
use crate::model::Identity;
use crate::model::NewIdentity;
use crate::model::RowKey;
use crate::model::Timestamp;
use crate::model::select_latest;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Rows and key counter guarded together.
#[derive(Debug, Default)]
struct MemoryRows {
    /// Rows in insertion order.
    rows: Vec<Identity>,
    /// Last assigned row key.
    last_row_key: i64,
}

/// In-memory identity store.
///
/// # Invariants
/// - `row_key` values are assigned in strictly increasing order from 1.
/// - `visit_id` values are unique; duplicates fail with [`StoreError::Conflict`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    /// Shared row table.
    inner: Arc<Mutex<MemoryRows>>,
}

impl InMemoryIdentityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the store mutex is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.rows.len())
    }

    /// Returns true when no rows are stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the store mutex is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.rows.is_empty())
    }

    /// Returns every stored row in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the store mutex is poisoned.
    pub fn rows(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.lock()?.rows.clone())
    }

    /// Locks the row table.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryRows>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Store("identity store mutex poisoned".to_string()))
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn find_latest_by_ip(&self, ip: &str) -> Result<Option<Identity>, StoreError> {
        let guard = self.lock()?;
        Ok(select_latest(guard.rows.iter().filter(|row| row.ip == ip)).cloned())
    }

    fn find_latest_within_window(
        &self,
        ip: &str,
        provider: &str,
        application: &str,
        not_before: Timestamp,
    ) -> Result<Option<Identity>, StoreError> {
        let guard = self.lock()?;
        let candidates = guard.rows.iter().filter(|row| {
            row.matches_triple(ip, provider, application) && row.created_at >= not_before
        });
        Ok(select_latest(candidates).cloned())
    }

    fn insert(&self, identity: NewIdentity) -> Result<Identity, StoreError> {
        let mut guard = self.lock()?;
        if guard.rows.iter().any(|row| row.visit_id == identity.visit_id) {
            return Err(StoreError::Conflict(format!(
                "visit_id {} already exists",
                identity.visit_id
            )));
        }
        let next = guard
            .last_row_key
            .checked_add(1)
            .ok_or_else(|| StoreError::Store("row key space exhausted".to_string()))?;
        guard.last_row_key = next;
        let row = identity.into_identity(RowKey::from_raw(next));
        guard.rows.push(row.clone());
        drop(guard);
        Ok(row)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

impl IdentityHistory for InMemoryIdentityStore {
    fn history(&self, ip: &str) -> Result<Vec<Identity>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.rows.iter().filter(|row| row.ip == ip).cloned().collect())
    }
}

// ============================================================================
// SECTION: Shared Store
// ============================================================================

/// Shared identity store backed by a trait object.
#[derive(Clone)]
pub struct SharedIdentityStore {
    /// Inner backend.
    inner: Arc<dyn IdentityBackend>,
}

impl SharedIdentityStore {
    /// Wraps an identity backend in a shared handle.
    #[must_use]
    pub fn from_store(store: impl IdentityBackend + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared backend.
    #[must_use]
    pub const fn new(inner: Arc<dyn IdentityBackend>) -> Self {
        Self {
            inner,
        }
    }
}

impl std::fmt::Debug for SharedIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedIdentityStore").finish_non_exhaustive()
    }
}

impl IdentityStore for SharedIdentityStore {
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
        self.inner.insert(identity)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.inner.readiness()
    }
}

impl IdentityHistory for SharedIdentityStore {
    fn history(&self, ip: &str) -> Result<Vec<Identity>, StoreError> {
        self.inner.history(ip)
    }
}
