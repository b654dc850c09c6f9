// crates/lineage-core/src/interfaces/mod.rs
// ============================================================================
// Module: Lineage Interfaces
// Description: Backend-agnostic interfaces for storage, identifiers, and time.
// Purpose: Define the contract surfaces consumed by the match engine.
// Dependencies: crate::model, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how Lineage integrates with persistence, entropy, and
//! wall-clock time without embedding backend-specific details. The engine
//! consumes exactly three store operations; any persistence engine that
//! satisfies them (and passes [`crate::conformance`]) can back the resolver.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::model::Identity;
use crate::model::NewIdentity;
use crate::model::Timestamp;

// ============================================================================
// SECTION: Identity Store
// ============================================================================

/// Identity store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - [`StoreError::Conflict`] is reserved for uniqueness violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store I/O or connectivity error.
    #[error("identity store io error: {0}")]
    Io(String),
    /// Insert rejected by a uniqueness constraint.
    #[error("identity store conflict: {0}")]
    Conflict(String),
    /// Store call exceeded its bounded wait.
    #[error("identity store timeout: {0}")]
    Timeout(String),
    /// Store data is invalid.
    #[error("identity store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("identity store error: {0}")]
    Store(String),
}

/// Persistence for identity rows.
///
/// Lookups are read-only. Inserts are atomic: a failed insert leaves no row.
pub trait IdentityStore {
    /// Returns the most recent row for `ip`, ordered by `created_at` then `row_key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_latest_by_ip(&self, ip: &str) -> Result<Option<Identity>, StoreError>;

    /// Returns the most recent row matching the full triple with
    /// `created_at >= not_before`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_latest_within_window(
        &self,
        ip: &str,
        provider: &str,
        application: &str,
        not_before: Timestamp,
    ) -> Result<Option<Identity>, StoreError>;

    /// Persists a new row and returns it with its assigned key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on uniqueness violations and other
    /// [`StoreError`] variants when the write fails.
    fn insert(&self, identity: NewIdentity) -> Result<Identity, StoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Administrative read access to a lineage's rows.
///
/// Not consulted by the match engine.
pub trait IdentityHistory {
    /// Returns every row for `ip` in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the listing fails.
    fn history(&self, ip: &str) -> Result<Vec<Identity>, StoreError>;
}

/// Store backend usable behind a shared trait object.
pub trait IdentityBackend: IdentityStore + IdentityHistory + Send + Sync {}

impl<T> IdentityBackend for T where T: IdentityStore + IdentityHistory + Send + Sync {}

// ============================================================================
// SECTION: Identifier Generator
// ============================================================================

/// Identifier generation errors.
///
/// # Invariants
/// - Fatal to the single request; callers never retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The entropy source could not be read.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),
}

/// Source of collision-resistant identifiers.
pub trait IdentifierGenerator {
    /// Generates a new identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the entropy source is unavailable.
    fn generate(&self) -> Result<String, IdentifierError>;
}

impl<T> IdentifierGenerator for Arc<T>
where
    T: IdentifierGenerator + ?Sized,
{
    fn generate(&self) -> Result<String, IdentifierError> {
        (**self).generate()
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock source for row creation times and window bounds.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

impl<T> Clock for Arc<T>
where
    T: Clock + ?Sized,
{
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
