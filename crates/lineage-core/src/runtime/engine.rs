// crates/lineage-core/src/runtime/engine.rs
// ============================================================================
// Module: Lineage Match Engine
// Description: Two-level, time-windowed identity resolution.
// Purpose: Reuse or mint identities for interactions under per-IP ownership.
// Dependencies: crate::{interfaces, model, runtime::gate}, thiserror
// ============================================================================

//! ## Overview
//! [`MatchEngine::resolve`] applies the two-level matching policy:
//!
//! 1. Level 1 looks up the latest row for the interaction IP. No row means a
//!    brand-new lineage: a fresh group and visit are minted and stored.
//! 2. Level 2 looks up the latest row for the full triple created inside the
//!    matching window. A hit is returned unchanged; a miss stores a new visit
//!    under the lineage group.
//!
//! The IP gate key is owned for the whole decision, so level-1 decisions for
//! one IP are linearizable and stored `created_at` values never decrease in
//! insertion order.
//!
//! `store_timeout` is a latency check applied after each lookup returns, not
//! a deadline: the engine cannot interrupt a synchronous store call. Stores
//! bound their own waits (the `SQLite` store through its busy timeout), and
//! the HTTP collaborator bounds the whole request. Inserts are never turned
//! into timeouts after the fact, since the row may already be committed.
//!
//! Security posture: interaction fields are untrusted and compared verbatim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::interfaces::Clock;
use crate::interfaces::IdentifierError;
use crate::interfaces::IdentifierGenerator;
use crate::interfaces::IdentityStore;
use crate::interfaces::StoreError;
use crate::model::GroupId;
use crate::model::Identity;
use crate::model::IdentitySummary;
use crate::model::Interaction;
use crate::model::NewIdentity;
use crate::model::Timestamp;
use crate::model::ValidationError;
use crate::model::VisitId;
use crate::runtime::gate::GateError;
use crate::runtime::gate::GateKey;
use crate::runtime::gate::ResolutionGate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default trailing window within which a triple match is reused.
pub const DEFAULT_MATCH_WINDOW: Duration = Duration::from_secs(120 * 60);
/// Default bound on gate acquisition.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default bound on a single store lookup.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Match engine policy and latency bounds.
///
/// # Invariants
/// - All durations are expected to be non-zero; `lineage-config` rejects zero values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchEngineConfig {
    /// Trailing window within which a triple match is reused.
    pub match_window: Duration,
    /// Maximum wait for per-IP gate ownership.
    pub gate_timeout: Duration,
    /// Maximum latency tolerated for a single store lookup, checked once the
    /// lookup returns.
    pub store_timeout: Duration,
}

impl Default for MatchEngineConfig {
    fn default() -> Self {
        Self {
            match_window: DEFAULT_MATCH_WINDOW,
            gate_timeout: DEFAULT_GATE_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Decision state reached by a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// No prior row for the IP; a fresh group was created.
    NoLineage,
    /// Known lineage without a fresh triple match; a new visit was created.
    LineageNoWindowMatch,
    /// Fresh triple match; the stored row was reused.
    LineageWindowMatch,
}

impl ResolutionOutcome {
    /// Returns a stable label for audit output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoLineage => "no_lineage",
            Self::LineageNoWindowMatch => "lineage_no_window_match",
            Self::LineageWindowMatch => "lineage_window_match",
        }
    }
}

/// Result of resolving one interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved identity row.
    pub identity: Identity,
    /// True when a new row was stored.
    pub created: bool,
    /// Decision state that produced the row.
    pub outcome: ResolutionOutcome,
}

impl Resolution {
    /// Returns the collaborator-facing summary.
    #[must_use]
    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary::from(&self.identity)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Resolution step at which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionLevel {
    /// Acquiring per-IP ownership.
    Gate,
    /// Level-1 lineage lookup or fresh-lineage insert.
    Lineage,
    /// Level-2 window lookup or new-visit insert.
    Window,
}

impl ResolutionLevel {
    /// Returns a stable label for audit output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gate => "gate",
            Self::Lineage => "lineage",
            Self::Window => "window",
        }
    }
}

impl fmt::Display for ResolutionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Every variant other than [`ResolveError::Validation`] carries the IP and
///   the level that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Interaction is missing a required field; no store access occurred.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Store lookup or insert failed.
    #[error("storage failure for ip {ip} at {level} level: {source}")]
    Storage {
        /// Interaction IP.
        ip: String,
        /// Level that failed.
        level: ResolutionLevel,
        /// Underlying store error.
        source: StoreError,
    },
    /// Identifier generation failed; fatal to this request.
    #[error("identifier generation failed for ip {ip} at {level} level: {source}")]
    IdentifierGeneration {
        /// Interaction IP.
        ip: String,
        /// Level that failed.
        level: ResolutionLevel,
        /// Underlying generator error.
        source: IdentifierError,
    },
    /// Gate acquisition or a store call exceeded its bound.
    #[error("resolution timed out for ip {ip} at {level} level: {detail}")]
    Timeout {
        /// Interaction IP.
        ip: String,
        /// Level that timed out.
        level: ResolutionLevel,
        /// Timeout detail.
        detail: String,
    },
}

impl ResolveError {
    /// Returns a stable label for the error category.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Storage {
                ..
            } => "storage",
            Self::IdentifierGeneration {
                ..
            } => "identifier_generation",
            Self::Timeout {
                ..
            } => "timeout",
        }
    }

    /// Returns the level that failed, when the error happened past validation.
    #[must_use]
    pub const fn level(&self) -> Option<ResolutionLevel> {
        match self {
            Self::Validation(_) => None,
            Self::Storage {
                level, ..
            }
            | Self::IdentifierGeneration {
                level, ..
            }
            | Self::Timeout {
                level, ..
            } => Some(*level),
        }
    }

    /// Returns true when a store uniqueness constraint rejected an insert.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Storage {
                source: StoreError::Conflict(_),
                ..
            }
        )
    }

    /// Maps a store error, keeping store timeouts in the timeout category.
    fn from_store(ip: &str, level: ResolutionLevel, source: StoreError) -> Self {
        match source {
            StoreError::Timeout(detail) => Self::Timeout {
                ip: ip.to_string(),
                level,
                detail,
            },
            source => Self::Storage {
                ip: ip.to_string(),
                level,
                source,
            },
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Identity resolution engine.
///
/// # Invariants
/// - Holds no mutable state between requests other than the gate key table.
/// - Every resolution of an IP runs while owning that IP's gate key.
#[derive(Debug)]
pub struct MatchEngine<S, G, C> {
    /// Identity persistence.
    store: S,
    /// Group and visit identifier source.
    generator: G,
    /// Time source for row creation and window bounds.
    clock: C,
    /// Per-IP serialization.
    gate: ResolutionGate,
    /// Policy and latency bounds.
    config: MatchEngineConfig,
}

impl<S, G, C> MatchEngine<S, G, C>
where
    S: IdentityStore,
    G: IdentifierGenerator,
    C: Clock,
{
    /// Creates an engine over the provided collaborators.
    #[must_use]
    pub fn new(store: S, generator: G, clock: C, config: MatchEngineConfig) -> Self {
        Self {
            store,
            generator,
            clock,
            gate: ResolutionGate::new(),
            config,
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the resolution gate.
    #[must_use]
    pub const fn gate(&self) -> &ResolutionGate {
        &self.gate
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &MatchEngineConfig {
        &self.config
    }

    /// Resolves an interaction into an identity.
    ///
    /// A uniqueness conflict on insert restarts the decision from the level-1
    /// lookup once; a second conflict is returned as a storage error.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Validation`] before touching the store,
    /// [`ResolveError::Timeout`] when the gate or a store call exceeds its
    /// bound, and [`ResolveError::Storage`] or
    /// [`ResolveError::IdentifierGeneration`] when a collaborator fails.
    pub fn resolve(&self, interaction: &Interaction) -> Result<Resolution, ResolveError> {
        interaction.validate()?;
        let ip = interaction.ip.as_str();
        let _guard = self
            .gate
            .acquire(GateKey::lineage(ip), self.config.gate_timeout)
            .map_err(|err: GateError| ResolveError::Timeout {
                ip: ip.to_string(),
                level: ResolutionLevel::Gate,
                detail: err.to_string(),
            })?;
        match self.attempt(interaction) {
            Err(err) if err.is_conflict() => self.attempt(interaction),
            outcome => outcome,
        }
    }

    /// Runs one level-1/level-2 decision while the gate key is owned.
    fn attempt(&self, interaction: &Interaction) -> Result<Resolution, ResolveError> {
        let ip = interaction.ip.as_str();
        let lineage = self.lookup(ip, ResolutionLevel::Lineage, || {
            self.store.find_latest_by_ip(ip)
        })?;

        let Some(lineage) = lineage else {
            let group_id = GroupId::new(self.generate(ip, ResolutionLevel::Lineage)?);
            let visit_id = VisitId::new(self.generate(ip, ResolutionLevel::Lineage)?);
            let row = new_row(interaction, group_id, visit_id, self.clock.now());
            let identity = self.insert(ip, ResolutionLevel::Lineage, row)?;
            return Ok(Resolution {
                identity,
                created: true,
                outcome: ResolutionOutcome::NoLineage,
            });
        };

        let now = self.clock.now();
        let window_start = now.saturating_sub(self.config.match_window);
        let fresh = self.lookup(ip, ResolutionLevel::Window, || {
            self.store.find_latest_within_window(
                ip,
                &interaction.provider,
                &interaction.application,
                window_start,
            )
        })?;
        if let Some(identity) = fresh {
            return Ok(Resolution {
                identity,
                created: false,
                outcome: ResolutionOutcome::LineageWindowMatch,
            });
        }

        let visit_id = VisitId::new(self.generate(ip, ResolutionLevel::Window)?);
        // A clock that stepped backwards must not back-date the lineage.
        let created_at = now.max(lineage.created_at);
        let row = new_row(interaction, lineage.group_id, visit_id, created_at);
        let identity = self.insert(ip, ResolutionLevel::Window, row)?;
        Ok(Resolution {
            identity,
            created: true,
            outcome: ResolutionOutcome::LineageNoWindowMatch,
        })
    }

    /// Runs a read-only store query and rejects results slower than `store_timeout`.
    ///
    /// The query itself is not interrupted; a store that never returns blocks
    /// the caller until its own wait bound fires.
    fn lookup<F>(
        &self,
        ip: &str,
        level: ResolutionLevel,
        query: F,
    ) -> Result<Option<Identity>, ResolveError>
    where
        F: FnOnce() -> Result<Option<Identity>, StoreError>,
    {
        let started = Instant::now();
        let found = query().map_err(|err| ResolveError::from_store(ip, level, err))?;
        let elapsed = started.elapsed();
        if elapsed > self.config.store_timeout {
            return Err(ResolveError::Timeout {
                ip: ip.to_string(),
                level,
                detail: format!(
                    "store lookup took {} ms (limit {} ms)",
                    elapsed.as_millis(),
                    self.config.store_timeout.as_millis()
                ),
            });
        }
        Ok(found)
    }

    /// Persists a new row.
    fn insert(
        &self,
        ip: &str,
        level: ResolutionLevel,
        row: NewIdentity,
    ) -> Result<Identity, ResolveError> {
        self.store.insert(row).map_err(|err| ResolveError::from_store(ip, level, err))
    }

    /// Generates one identifier.
    fn generate(&self, ip: &str, level: ResolutionLevel) -> Result<String, ResolveError> {
        self.generator.generate().map_err(|source| ResolveError::IdentifierGeneration {
            ip: ip.to_string(),
            level,
            source,
        })
    }
}

/// Builds the row stored for `interaction`.
fn new_row(
    interaction: &Interaction,
    group_id: GroupId,
    visit_id: VisitId,
    created_at: Timestamp,
) -> NewIdentity {
    NewIdentity {
        group_id,
        visit_id,
        ip: interaction.ip.clone(),
        provider: interaction.provider.clone(),
        application: interaction.application.clone(),
        created_at,
    }
}
