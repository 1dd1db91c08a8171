//! Closed classification of remote target statuses.
//!
//! Provider adapters translate their raw status strings into
//! [`ReconciliationStatus`]; the engine only ever switches on this enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classified status of a remote target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateCleanupInProgress,
    /// Update of an app-style target failed; there is no automatic rollback.
    UpdateFailed,
    NoChange,
    RollbackInProgress,
    /// Creation was rolled back. The target is dead and blocks further updates.
    RollbackComplete,
    /// An update was rolled back to the previous definition. Still updatable.
    UpdateRollbackComplete,
    RollbackFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    Unknown,
}

impl ReconciliationStatus {
    /// All variants, in declaration order.
    pub const ALL: [ReconciliationStatus; 16] = [
        ReconciliationStatus::CreateInProgress,
        ReconciliationStatus::CreateComplete,
        ReconciliationStatus::CreateFailed,
        ReconciliationStatus::UpdateInProgress,
        ReconciliationStatus::UpdateComplete,
        ReconciliationStatus::UpdateCleanupInProgress,
        ReconciliationStatus::UpdateFailed,
        ReconciliationStatus::NoChange,
        ReconciliationStatus::RollbackInProgress,
        ReconciliationStatus::RollbackComplete,
        ReconciliationStatus::UpdateRollbackComplete,
        ReconciliationStatus::RollbackFailed,
        ReconciliationStatus::DeleteInProgress,
        ReconciliationStatus::DeleteComplete,
        ReconciliationStatus::DeleteFailed,
        ReconciliationStatus::Unknown,
    ];

    /// Canonical name, e.g. `CREATE_IN_PROGRESS`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            ReconciliationStatus::CreateComplete => "CREATE_COMPLETE",
            ReconciliationStatus::CreateFailed => "CREATE_FAILED",
            ReconciliationStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            ReconciliationStatus::UpdateComplete => "UPDATE_COMPLETE",
            ReconciliationStatus::UpdateCleanupInProgress => "UPDATE_CLEANUP_IN_PROGRESS",
            ReconciliationStatus::UpdateFailed => "UPDATE_FAILED",
            ReconciliationStatus::NoChange => "NO_CHANGE",
            ReconciliationStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            ReconciliationStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            ReconciliationStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            ReconciliationStatus::RollbackFailed => "ROLLBACK_FAILED",
            ReconciliationStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            ReconciliationStatus::DeleteComplete => "DELETE_COMPLETE",
            ReconciliationStatus::DeleteFailed => "DELETE_FAILED",
            ReconciliationStatus::Unknown => "UNKNOWN",
        }
    }

    /// Whether the remote side is still working.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ReconciliationStatus::CreateInProgress
                | ReconciliationStatus::UpdateInProgress
                | ReconciliationStatus::UpdateCleanupInProgress
                | ReconciliationStatus::RollbackInProgress
                | ReconciliationStatus::DeleteInProgress
        )
    }

    /// Whether the status is a resting state the remote side will not leave on its own.
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress() && *self != ReconciliationStatus::Unknown
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconciliationStatus {
    type Err = std::convert::Infallible;

    /// Parses a canonical name. Anything else is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .unwrap_or(ReconciliationStatus::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip_through_from_str() {
        for status in ReconciliationStatus::ALL {
            let parsed: ReconciliationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unmapped_string_is_unknown() {
        let parsed: ReconciliationStatus = "IMPORT_IN_PROGRESS".parse().unwrap();
        assert_eq!(parsed, ReconciliationStatus::Unknown);
    }

    #[test]
    fn in_progress_and_terminal_are_disjoint() {
        for status in ReconciliationStatus::ALL {
            assert!(!(status.is_in_progress() && status.is_terminal()), "{status}");
        }
        assert!(!ReconciliationStatus::Unknown.is_terminal());
        assert!(!ReconciliationStatus::Unknown.is_in_progress());
        assert!(ReconciliationStatus::UpdateCleanupInProgress.is_in_progress());
        assert!(ReconciliationStatus::RollbackComplete.is_terminal());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ReconciliationStatus::UpdateRollbackComplete).unwrap();
        assert_eq!(json, "\"UPDATE_ROLLBACK_COMPLETE\"");
    }
}
