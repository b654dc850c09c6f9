// crates/lineage-core/src/lib.rs
// ============================================================================
// Module: Lineage Core Library
// Description: Public API surface for the Lineage identity resolver core.
// Purpose: Expose identity types, store interfaces, and the match engine.
// Dependencies: crate::{model, interfaces, runtime, conformance}
// ============================================================================

//! ## Overview
//! Lineage core resolves client interactions (IP, provider, application) into
//! durable identities: a long-lived group identifier shared by every visit
//! from the same source and a per-visit identifier for each stored row. It is
//! persistence-agnostic and integrates through explicit interfaces; the only
//! shared mutable state it owns is the per-IP resolution gate.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod conformance;
pub mod model;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use model::*;

pub use interfaces::Clock;
pub use interfaces::IdentifierError;
pub use interfaces::IdentifierGenerator;
pub use interfaces::IdentityBackend;
pub use interfaces::IdentityHistory;
pub use interfaces::IdentityStore;
pub use interfaces::StoreError;
pub use runtime::DEFAULT_GATE_TIMEOUT;
pub use runtime::DEFAULT_MATCH_WINDOW;
pub use runtime::DEFAULT_STORE_TIMEOUT;
pub use runtime::GateError;
pub use runtime::GateGuard;
pub use runtime::GateKey;
pub use runtime::InMemoryIdentityStore;
pub use runtime::ManualClock;
pub use runtime::MatchEngine;
pub use runtime::MatchEngineConfig;
pub use runtime::RandomIdGenerator;
pub use runtime::Resolution;
pub use runtime::ResolutionGate;
pub use runtime::ResolutionLevel;
pub use runtime::ResolutionOutcome;
pub use runtime::ResolveError;
pub use runtime::SequenceIdGenerator;
pub use runtime::SharedIdentityStore;
pub use runtime::SystemClock;
