// crates/lineage-core/src/model/mod.rs
// ============================================================================
// Module: Lineage Data Model
// Description: Identity data model, identifiers, and time values.
// Purpose: Group the value types shared by the engine, stores, and servers.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! Core types are plain values: they carry no behavior beyond validation and
//! ordering. Persistence and resolution live in [`crate::interfaces`] and
//! [`crate::runtime`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod identity;
pub mod interaction;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::GroupId;
pub use identifiers::RowKey;
pub use identifiers::VisitId;
pub use identity::Identity;
pub use identity::NewIdentity;
pub use identity::select_latest;
pub use interaction::IdentitySummary;
pub use interaction::Interaction;
pub use interaction::InteractionField;
pub use interaction::ValidationError;
pub use time::Timestamp;
