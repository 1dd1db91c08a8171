//! Remote target identity and point-in-time observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::spec::Parameter;
use super::status::ReconciliationStatus;

/// Resolved remote identity of a target, as found by the existence probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub id: String,
    pub name: String,
    /// Whether the probe found the target before this run.
    pub existed: bool,
    /// Classified status at probe time.
    pub status: ReconciliationStatus,
    /// Raw provider status at probe time.
    pub status_code: String,
}

impl TargetDescriptor {
    pub fn existing(
        id: impl Into<String>,
        name: impl Into<String>,
        status: ReconciliationStatus,
        status_code: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            existed: true,
            status,
            status_code: status_code.into(),
        }
    }
}

/// One progress event reported by the provider for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEvent {
    pub timestamp: DateTime<Utc>,
    /// Logical resource the event is about.
    pub resource: String,
    /// Raw status text of the resource.
    pub status: String,
    pub reason: Option<String>,
}

impl TargetEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        resource: impl Into<String>,
        status: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            resource: resource.into(),
            status: status.into(),
            reason,
        }
    }

    /// Single-line rendering used for the operator log.
    pub fn render(&self) -> String {
        match &self.reason {
            Some(reason) if !reason.is_empty() => format!(
                "[{}] {} {} - {}",
                self.timestamp.to_rfc3339(),
                self.resource,
                self.status,
                reason
            ),
            _ => format!(
                "[{}] {} {}",
                self.timestamp.to_rfc3339(),
                self.resource,
                self.status
            ),
        }
    }
}

/// One point-in-time read of a target, fetched fresh on every poll tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub target_id: String,
    pub status: ReconciliationStatus,
    pub status_code: String,
    pub status_reason: Option<String>,
    /// Populated by providers only at terminal success.
    pub outputs: BTreeMap<String, String>,
    /// Events since the target was created, newest last.
    pub events: Vec<TargetEvent>,
}

impl StatusSnapshot {
    pub fn new(
        target_id: impl Into<String>,
        status: ReconciliationStatus,
        status_code: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            status,
            status_code: status_code.into(),
            status_reason: None,
            outputs: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.status_reason = Some(reason.into());
        self
    }

    pub fn with_events(mut self, events: Vec<TargetEvent>) -> Self {
        self.events = events;
        self
    }

    /// Human-readable reason, falling back to the raw status code.
    pub fn reason_or_code(&self) -> &str {
        self.status_reason
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.status_code)
    }
}

/// Result of submitting an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSubmission {
    pub submission_id: String,
    /// The provider decided synchronously that nothing needs to change.
    pub no_change: bool,
}

impl UpdateSubmission {
    pub fn submitted(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            no_change: false,
        }
    }

    pub fn no_change(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            no_change: true,
        }
    }
}

/// Definition of a target as it stood before this run changed it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExistingTargetInfo {
    pub existed: bool,
    pub previous_template: Option<String>,
    pub previous_parameters: Vec<Parameter>,
}

/// Summary row returned by target listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub id: String,
    pub name: String,
    pub status: ReconciliationStatus,
    pub status_code: String,
    pub status_reason: Option<String>,
}
