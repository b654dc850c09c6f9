// crates/lineage-core/src/model/interaction.rs
// ============================================================================
// Module: Lineage Interactions
// Description: Inbound interaction triples and the outbound identity summary.
// Purpose: Define the request/response values exchanged with collaborators.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! An [`Interaction`] is the ephemeral request triple consumed once per
//! resolution. Fields are required and must be non-empty; no further
//! normalization (for example IP address parsing) is applied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::model::identifiers::GroupId;
use crate::model::identifiers::VisitId;
use crate::model::identity::Identity;

// ============================================================================
// SECTION: Interaction
// ============================================================================

/// Inbound request triple to resolve into an identity.
///
/// # Invariants
/// - Missing fields deserialize as empty strings and fail [`Interaction::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interaction {
    /// Client IP address, compared verbatim.
    #[serde(default)]
    pub ip: String,
    /// Provider label.
    #[serde(default)]
    pub provider: String,
    /// Application label.
    #[serde(default)]
    pub application: String,
}

impl Interaction {
    /// Creates a new interaction.
    #[must_use]
    pub fn new(
        ip: impl Into<String>,
        provider: impl Into<String>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            provider: provider.into(),
            application: application.into(),
        }
    }

    /// Checks that every field is present and non-blank.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first missing field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            (InteractionField::Ip, &self.ip),
            (InteractionField::Provider, &self.provider),
            (InteractionField::Application, &self.application),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field));
            }
        }
        Ok(())
    }
}

/// Interaction field names used in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionField {
    /// The `ip` field.
    Ip,
    /// The `provider` field.
    Provider,
    /// The `application` field.
    Application,
}

impl InteractionField {
    /// Returns the wire name of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Provider => "provider",
            Self::Application => "application",
        }
    }
}

/// Interaction validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was missing or blank.
    #[error("interaction field `{}` is required", .0.as_str())]
    MissingField(InteractionField),
}

// ============================================================================
// SECTION: Identity Summary
// ============================================================================

/// Identity summary returned across the collaborator boundary.
///
/// # Invariants
/// - Never exposes `row_key` or `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    /// Long-lived group identifier.
    pub group_id: GroupId,
    /// Per-visit identifier.
    pub visit_id: VisitId,
}

impl From<&Identity> for IdentitySummary {
    fn from(identity: &Identity) -> Self {
        Self {
            group_id: identity.group_id.clone(),
            visit_id: identity.visit_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Interaction;
    use super::InteractionField;
    use super::ValidationError;

    #[test]
    fn validate_reports_first_blank_field() {
        let interaction = Interaction::new("10.0.0.1", "  ", "");
        assert_eq!(
            interaction.validate(),
            Err(ValidationError::MissingField(InteractionField::Provider))
        );
        assert!(Interaction::new("10.0.0.1", "p1", "a1").validate().is_ok());
    }
}
