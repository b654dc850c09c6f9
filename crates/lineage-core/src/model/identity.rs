// crates/lineage-core/src/model/identity.rs
// ============================================================================
// Module: Lineage Identity Rows
// Description: Persisted identity rows and pending inserts.
// Purpose: Define the stored record and its deterministic recency ordering.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An [`Identity`] is an immutable stored row. A [`NewIdentity`] is the same
//! record before the store has assigned its [`RowKey`]. Recency is ordered by
//! `created_at` and then by `row_key`, so equal timestamps never yield a
//! nondeterministic "latest" row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::identifiers::GroupId;
use crate::model::identifiers::RowKey;
use crate::model::identifiers::VisitId;
use crate::model::time::Timestamp;

// ============================================================================
// SECTION: Identity Rows
// ============================================================================

/// Persisted identity row.
///
/// # Invariants
/// - Rows are immutable once written.
/// - `row_key` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Store-assigned unique key.
    pub row_key: RowKey,
    /// Lineage group identifier.
    pub group_id: GroupId,
    /// Visit identifier unique to this row.
    pub visit_id: VisitId,
    /// Client IP address.
    pub ip: String,
    /// Provider label.
    pub provider: String,
    /// Application label.
    pub application: String,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Identity {
    /// Returns the key that orders rows from oldest to most recent.
    #[must_use]
    pub const fn recency(&self) -> (Timestamp, RowKey) {
        (self.created_at, self.row_key)
    }

    /// Returns true when the row belongs to the provided triple.
    #[must_use]
    pub fn matches_triple(&self, ip: &str, provider: &str, application: &str) -> bool {
        self.ip == ip && self.provider == provider && self.application == application
    }
}

/// Identity row awaiting insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    /// Lineage group identifier.
    pub group_id: GroupId,
    /// Visit identifier unique to this row.
    pub visit_id: VisitId,
    /// Client IP address.
    pub ip: String,
    /// Provider label.
    pub provider: String,
    /// Application label.
    pub application: String,
    /// Creation time.
    pub created_at: Timestamp,
}

impl NewIdentity {
    /// Attaches the store-assigned key, producing the persisted row.
    #[must_use]
    pub fn into_identity(self, row_key: RowKey) -> Identity {
        Identity {
            row_key,
            group_id: self.group_id,
            visit_id: self.visit_id,
            ip: self.ip,
            provider: self.provider,
            application: self.application,
            created_at: self.created_at,
        }
    }
}

/// Selects the most recent row by `created_at`, then `row_key`.
#[must_use]
pub fn select_latest<'a, I>(rows: I) -> Option<&'a Identity>
where
    I: IntoIterator<Item = &'a Identity>,
{
    rows.into_iter().max_by_key(|row| row.recency())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::NewIdentity;
    use super::select_latest;
    use crate::model::GroupId;
    use crate::model::RowKey;
    use crate::model::Timestamp;
    use crate::model::VisitId;

    fn row(key: i64, created_at: i64) -> super::Identity {
        NewIdentity {
            group_id: GroupId::new("g"),
            visit_id: VisitId::new(format!("v{key}")),
            ip: "10.0.0.1".to_string(),
            provider: "p".to_string(),
            application: "a".to_string(),
            created_at: Timestamp::from_unix_millis(created_at),
        }
        .into_identity(RowKey::from_raw(key))
    }

    #[test]
    fn select_latest_breaks_ties_by_row_key() {
        let rows = vec![row(3, 10), row(1, 20), row(2, 20)];
        assert_eq!(select_latest(&rows).unwrap().row_key, RowKey::from_raw(2));
        let reversed: Vec<_> = rows.iter().rev().cloned().collect();
        assert_eq!(select_latest(&reversed).unwrap().row_key, RowKey::from_raw(2));
        assert!(select_latest(std::iter::empty::<&super::Identity>()).is_none());
    }
}
