// crates/lineage-core/src/runtime/mod.rs
// ============================================================================
// Module: Lineage Runtime
// Description: Match engine, resolution gate, and reference implementations.
// Purpose: Resolve interactions into identities against pluggable interfaces.
// Dependencies: crate::{model, interfaces}, rand, time, uuid
// ============================================================================

//! ## Overview
//! Runtime modules implement the two-level matching policy, per-IP
//! serialization, and the default clock, generator, and in-memory store. All
//! request surfaces (HTTP, CLI) must call into [`MatchEngine::resolve`] so the
//! gate and the matching policy are applied uniformly.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod clock;
pub mod engine;
pub mod gate;
pub mod generator;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use clock::ManualClock;
pub use clock::SystemClock;
pub use engine::DEFAULT_GATE_TIMEOUT;
pub use engine::DEFAULT_MATCH_WINDOW;
pub use engine::DEFAULT_STORE_TIMEOUT;
pub use engine::MatchEngine;
pub use engine::MatchEngineConfig;
pub use engine::Resolution;
pub use engine::ResolutionLevel;
pub use engine::ResolutionOutcome;
pub use engine::ResolveError;
pub use gate::GateError;
pub use gate::GateGuard;
pub use gate::GateKey;
pub use gate::ResolutionGate;
pub use generator::RandomIdGenerator;
pub use generator::SequenceIdGenerator;
pub use store::InMemoryIdentityStore;
pub use store::SharedIdentityStore;
