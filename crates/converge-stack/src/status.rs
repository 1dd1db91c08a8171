//! Raw stack status codes and their classification.

use converge_core::ReconciliationStatus;

/// Every stack status the engine knows, with its classification.
///
/// Codes missing from this table classify as `Unknown`, which the engine
/// treats as still in progress.
pub const STATUS_TABLE: &[(&str, ReconciliationStatus)] = &[
    ("CREATE_IN_PROGRESS", ReconciliationStatus::CreateInProgress),
    ("CREATE_COMPLETE", ReconciliationStatus::CreateComplete),
    ("CREATE_FAILED", ReconciliationStatus::CreateFailed),
    ("ROLLBACK_IN_PROGRESS", ReconciliationStatus::RollbackInProgress),
    ("ROLLBACK_COMPLETE", ReconciliationStatus::RollbackComplete),
    ("ROLLBACK_FAILED", ReconciliationStatus::RollbackFailed),
    ("UPDATE_IN_PROGRESS", ReconciliationStatus::UpdateInProgress),
    (
        "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
        ReconciliationStatus::UpdateCleanupInProgress,
    ),
    ("UPDATE_COMPLETE", ReconciliationStatus::UpdateComplete),
    ("UPDATE_FAILED", ReconciliationStatus::UpdateFailed),
    ("UPDATE_ROLLBACK_IN_PROGRESS", ReconciliationStatus::RollbackInProgress),
    (
        "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
        ReconciliationStatus::RollbackInProgress,
    ),
    ("UPDATE_ROLLBACK_COMPLETE", ReconciliationStatus::UpdateRollbackComplete),
    ("UPDATE_ROLLBACK_FAILED", ReconciliationStatus::RollbackFailed),
    ("DELETE_IN_PROGRESS", ReconciliationStatus::DeleteInProgress),
    ("DELETE_COMPLETE", ReconciliationStatus::DeleteComplete),
    ("DELETE_FAILED", ReconciliationStatus::DeleteFailed),
];

/// Message the service returns when an update would change nothing.
pub const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

pub fn classify(raw: &str) -> ReconciliationStatus {
    STATUS_TABLE
        .iter()
        .find(|(code, _)| *code == raw)
        .map(|(_, status)| *status)
        .unwrap_or(ReconciliationStatus::Unknown)
}

/// Whether an update rejection really means "already up to date".
pub fn is_no_updates_message(message: &str) -> bool {
    message.contains(NO_UPDATES_MESSAGE)
}
