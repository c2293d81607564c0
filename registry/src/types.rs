//! State and actions of the registry reducer.

use crate::engine::CommitReport;
use crate::staging::{StagingLayer, ToggleOutcome};
use chrono::{DateTime, Utc};
use gift_registry_core::item::{CatalogSnapshot, ClientId, ItemId};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Correlation id pairing a command with the event that answers it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

// ============================================================================
// State
// ============================================================================

/// Everything one guest's session knows.
#[derive(Clone, Debug)]
pub struct RegistryState {
    /// Last complete snapshot from the catalog feed
    pub catalog: CatalogSnapshot,
    /// When `catalog` was last replaced
    pub catalog_updated_at: Option<DateTime<Utc>>,
    /// Local intent
    pub staging: StagingLayer,
    /// Save request whose pass is running
    pub committing: Option<RequestId>,
    /// Report of the most recent pass
    pub last_report: Option<CommitReport>,
}

impl RegistryState {
    /// Fresh state for `client` over `catalog`.
    #[must_use]
    pub const fn new(client: ClientId, catalog: CatalogSnapshot) -> Self {
        Self {
            catalog,
            catalog_updated_at: None,
            staging: StagingLayer::new(client),
            committing: None,
            last_report: None,
        }
    }

    /// Effective checkbox state of `id`.
    #[must_use]
    pub fn effective_checked(&self, id: &ItemId) -> bool {
        self.staging.effective_checked(id, &self.catalog)
    }

    /// Whether a commit pass is running.
    #[must_use]
    pub const fn is_committing(&self) -> bool {
        self.committing.is_some()
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Why a save was refused without running a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveRejection {
    /// Another save's pass has not finished
    CommitInProgress {
        /// The running save
        current: RequestId,
    },
}

/// Actions for the registry reducer.
#[derive(Clone, Debug)]
pub enum RegistryAction {
    // Commands
    /// Flip the local intent for an item
    Toggle {
        /// Correlation id
        request: RequestId,
        /// Item to toggle
        id: ItemId,
    },

    /// Commit everything staged
    Save {
        /// Correlation id
        request: RequestId,
    },

    /// The catalog feed delivered a new snapshot
    CatalogUpdated {
        /// Full ordered collection
        snapshot: CatalogSnapshot,
    },

    // Events
    /// Answer to `Toggle`
    Toggled {
        /// Correlation id
        request: RequestId,
        /// Item toggled
        id: ItemId,
        /// What happened
        outcome: ToggleOutcome,
    },

    /// Answer to `Save` when nothing was staged
    NothingToSave {
        /// Correlation id
        request: RequestId,
    },

    /// Answer to `Save` when the save was refused
    SaveRejected {
        /// Correlation id
        request: RequestId,
        /// Reason
        reason: SaveRejection,
    },

    /// Answer to `Save` once the pass finished
    CommitCompleted {
        /// Correlation id
        request: RequestId,
        /// Per-item outcomes
        report: CommitReport,
    },
}

impl RegistryAction {
    /// Correlation id carried by the action, if any.
    #[must_use]
    pub const fn request(&self) -> Option<RequestId> {
        match self {
            Self::Toggle { request, .. }
            | Self::Save { request }
            | Self::Toggled { request, .. }
            | Self::NothingToSave { request }
            | Self::SaveRejected { request, .. }
            | Self::CommitCompleted { request, .. } => Some(*request),
            Self::CatalogUpdated { .. } => None,
        }
    }

    /// Whether this event answers the `Save` with id `request`.
    #[must_use]
    pub fn answers_save(&self, request: RequestId) -> bool {
        matches!(
            self,
            Self::NothingToSave { .. } | Self::SaveRejected { .. } | Self::CommitCompleted { .. }
        ) && self.request() == Some(request)
    }

    /// Whether this event answers the `Toggle` with id `request`.
    #[must_use]
    pub fn answers_toggle(&self, request: RequestId) -> bool {
        matches!(self, Self::Toggled { .. }) && self.request() == Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_match_on_correlation_id() {
        let first = RequestId::new(1);
        let second = RequestId::new(2);
        let answer = RegistryAction::NothingToSave { request: first };

        assert!(answer.answers_save(first));
        assert!(!answer.answers_save(second));
        assert!(!answer.answers_toggle(first));
        assert!(!RegistryAction::Save { request: first }.answers_save(first));
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::new(7).to_string(), "req-7");
    }
}
