//! Terminal result of a reconciliation run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::status::ReconciliationStatus;
use super::target::ExistingTargetInfo;

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
    /// The deadline passed without a terminal status. Reported as a failure.
    Timeout,
}

impl OutcomeStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, OutcomeStatus::Success)
    }
}

/// Immutable outcome of one run.
///
/// Only [`OutcomeBuilder`] constructs outcomes, which keeps
/// `error_message` present exactly when `status` is not `Success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    status: OutcomeStatus,
    target_name: String,
    target_id: Option<String>,
    outputs: BTreeMap<String, String>,
    error_message: Option<String>,
    no_change_detected: bool,
    existed_before_run: bool,
    final_status: Option<ReconciliationStatus>,
    existing: Option<ExistingTargetInfo>,
}

impl DeploymentOutcome {
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.status == OutcomeStatus::Timeout
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn outputs(&self) -> &BTreeMap<String, String> {
        &self.outputs
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn no_change_detected(&self) -> bool {
        self.no_change_detected
    }

    pub fn existed_before_run(&self) -> bool {
        self.existed_before_run
    }

    /// Last classified status observed before the run ended.
    pub fn final_status(&self) -> Option<ReconciliationStatus> {
        self.final_status
    }

    /// Previous definition of the target, captured on the update path.
    pub fn existing(&self) -> Option<&ExistingTargetInfo> {
        self.existing.as_ref()
    }
}

/// Accumulates the facts of a run and seals them into a [`DeploymentOutcome`].
///
/// The finishing methods consume the builder, so a given builder yields
/// exactly one outcome.
#[derive(Debug, Clone)]
pub struct OutcomeBuilder {
    target_name: String,
    target_id: Option<String>,
    outputs: BTreeMap<String, String>,
    no_change_detected: bool,
    existed_before_run: bool,
    final_status: Option<ReconciliationStatus>,
    existing: Option<ExistingTargetInfo>,
}

impl OutcomeBuilder {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            target_id: None,
            outputs: BTreeMap::new(),
            no_change_detected: false,
            existed_before_run: false,
            final_status: None,
            existing: None,
        }
    }

    pub fn target_id(mut self, id: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self
    }

    pub fn existed_before_run(mut self, existed: bool) -> Self {
        self.existed_before_run = existed;
        self
    }

    pub fn no_change_detected(mut self, no_change: bool) -> Self {
        self.no_change_detected = no_change;
        self
    }

    pub fn final_status(mut self, status: ReconciliationStatus) -> Self {
        self.final_status = Some(status);
        self
    }

    pub fn outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn existing(mut self, existing: Option<ExistingTargetInfo>) -> Self {
        self.existing = existing;
        self
    }

    pub fn success(self) -> DeploymentOutcome {
        self.seal(OutcomeStatus::Success, None)
    }

    pub fn failure(self, message: impl Into<String>) -> DeploymentOutcome {
        self.seal(OutcomeStatus::Failure, Some(message.into()))
    }

    /// Seal as a timeout. The message is prefixed so it always reads as one.
    pub fn timeout(self, message: impl Into<String>) -> DeploymentOutcome {
        let message = message.into();
        let message = if message.contains("timed out") {
            message
        } else {
            format!("timed out: {message}")
        };
        self.seal(OutcomeStatus::Timeout, Some(message))
    }

    fn seal(self, status: OutcomeStatus, error_message: Option<String>) -> DeploymentOutcome {
        DeploymentOutcome {
            status,
            target_name: self.target_name,
            target_id: self.target_id,
            outputs: self.outputs,
            error_message,
            no_change_detected: self.no_change_detected,
            existed_before_run: self.existed_before_run,
            final_status: self.final_status,
            existing: self.existing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error_message() {
        let outcome = OutcomeBuilder::new("stack-a")
            .target_id("arn:stack/a")
            .outputs(BTreeMap::from([("Url".to_string(), "https://a".to_string())]))
            .success();
        assert!(outcome.succeeded());
        assert!(outcome.error_message().is_none());
        assert_eq!(outcome.outputs().get("Url").map(String::as_str), Some("https://a"));
    }

    #[test]
    fn failure_and_timeout_carry_messages() {
        let failed = OutcomeBuilder::new("stack-a").failure("CREATE_FAILED: quota");
        assert_eq!(failed.status(), OutcomeStatus::Failure);
        assert_eq!(failed.error_message(), Some("CREATE_FAILED: quota"));

        let timed_out = OutcomeBuilder::new("stack-a").timeout("stack-a still CREATE_IN_PROGRESS");
        assert!(timed_out.timed_out());
        assert!(timed_out.status().is_failure());
        assert!(timed_out.error_message().unwrap().contains("timed out"));
    }

    #[test]
    fn outcome_serializes_status_uppercase() {
        let outcome = OutcomeBuilder::new("stack-a").no_change_detected(true).success();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["no_change_detected"], true);
    }
}
