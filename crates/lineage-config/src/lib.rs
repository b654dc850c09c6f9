// crates/lineage-config/src/lib.rs
// ============================================================================
// Module: Lineage Config Library
// Description: Canonical config model and fail-closed validation.
// Purpose: Single source of truth for lineage.toml semantics.
// Dependencies: lineage-core, lineage-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `lineage-config` defines the configuration model for the lineage resolver
//! service. Files are read under strict size and path limits, a small set of
//! environment variables may override individual fields, and the merged
//! result is validated before anything is built from it.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod env;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use env::EnvOverride;
