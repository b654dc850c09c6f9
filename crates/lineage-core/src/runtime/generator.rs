// crates/lineage-core/src/runtime/generator.rs
// ============================================================================
// Module: Lineage Identifier Generators
// Description: Random and sequential identifier generators.
// Purpose: Mint group and visit identifiers for new identity rows.
// Dependencies: crate::interfaces, rand, uuid
// ============================================================================

//! ## Overview
//! [`RandomIdGenerator`] reads 16 bytes from the operating system entropy
//! source and renders them as an RFC 4122 version 4 UUID (122 random bits).
//! Entropy failures surface as [`IdentifierError::EntropyUnavailable`].
//! [`SequenceIdGenerator`] is deterministic and intended for tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Builder;

use crate::interfaces::IdentifierError;
use crate::interfaces::IdentifierGenerator;

// ============================================================================
// SECTION: Random Generator
// ============================================================================

/// Generator backed by the operating system entropy source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdentifierGenerator for RandomIdGenerator {
    fn generate(&self) -> Result<String, IdentifierError> {
        let mut bytes = [0_u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| IdentifierError::EntropyUnavailable(err.to_string()))?;
        Ok(Builder::from_random_bytes(bytes).into_uuid().hyphenated().to_string())
    }
}

// ============================================================================
// SECTION: Sequence Generator
// ============================================================================

/// Deterministic generator producing `{prefix}-{n}` with `n` starting at 1.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    /// Prefix prepended to every identifier.
    prefix: String,
    /// Last issued sequence number.
    counter: AtomicU64,
}

impl SequenceIdGenerator {
    /// Creates a generator with the provided prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Returns how many identifiers have been issued.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl IdentifierGenerator for SequenceIdGenerator {
    fn generate(&self) -> Result<String, IdentifierError> {
        let next = self.counter.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        Ok(format!("{}-{next}", self.prefix))
    }
}
