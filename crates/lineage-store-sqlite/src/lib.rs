// crates/lineage-store-sqlite/src/lib.rs
// ============================================================================
// Module: Lineage SQLite Store
// Description: Durable identity store backed by SQLite.
// Purpose: Persist identity rows with indexed lineage and window lookups.
// Dependencies: lineage-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! Provides [`SqliteIdentityStore`], a durable [`lineage_core::IdentityStore`]
//! that bootstraps its own schema on open and maps `SQLite` failures onto the
//! store error taxonomy the match engine understands.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SCHEMA_VERSION;
pub use store::SqliteIdentityStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
