//! Reconciliation engine: probe, decide a verb, submit, poll to a verdict.
//!
//! One call to [`ReconciliationEngine::execute`] is one run. A run probes the
//! target, creates, updates or recreates it through the [`ProviderAdapter`],
//! then polls status under an absolute deadline until a terminal verdict or
//! the deadline. Expected provider failures never escape as errors; they end
//! up in the returned [`DeploymentOutcome`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::budget::TimeoutBudget;
use crate::config::EngineConfig;
use crate::cursor::EventCursor;
use crate::domain::{
    ConvergeError, DeploymentOutcome, DeploymentSpec, ExistingTargetInfo, OutcomeBuilder,
    ProviderError, ProviderResult, ReconciliationStatus, Result, StatusSnapshot,
    TargetDescriptor, TargetSummary,
};
use crate::log::{LogLevel, LogSink};
use crate::metrics::METRICS;
use crate::obs;
use crate::provider::ProviderAdapter;

/// Which transition the poll loop is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    Create,
    Update,
    Delete,
}

impl fmt::Display for PollMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollMode::Create => "create",
            PollMode::Update => "update",
            PollMode::Delete => "delete",
        })
    }
}

/// What one observed status means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    SuccessNoChange,
    Failure,
    RolledBack,
    /// The target vanished while a create or update was awaited.
    Deleted,
    Continue,
    /// Unmapped status; keep polling but warn.
    Unrecognised,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Continue | Verdict::Unrecognised)
    }
}

/// Classify `status` for a loop waiting in `mode`.
pub fn decide(mode: PollMode, status: ReconciliationStatus) -> Verdict {
    use ReconciliationStatus as S;

    match mode {
        PollMode::Delete => match status {
            S::DeleteComplete => Verdict::Success,
            S::DeleteFailed => Verdict::Failure,
            S::Unknown => Verdict::Unrecognised,
            _ => Verdict::Continue,
        },
        PollMode::Create | PollMode::Update => match status {
            S::CreateComplete | S::UpdateComplete => Verdict::Success,
            S::NoChange => Verdict::SuccessNoChange,
            S::CreateFailed | S::UpdateFailed | S::RollbackFailed | S::DeleteFailed => {
                Verdict::Failure
            }
            S::RollbackComplete | S::UpdateRollbackComplete => Verdict::RolledBack,
            S::DeleteComplete => Verdict::Deleted,
            S::CreateInProgress
            | S::UpdateInProgress
            | S::UpdateCleanupInProgress
            | S::RollbackInProgress
            | S::DeleteInProgress => Verdict::Continue,
            S::Unknown => Verdict::Unrecognised,
        },
    }
}

/// Drives one provider's targets to their desired state.
pub struct ReconciliationEngine<P> {
    provider: P,
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
}

impl<P: ProviderAdapter> ReconciliationEngine<P> {
    pub fn new(provider: P, config: EngineConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            provider,
            config,
            sink,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile the target named by `spec` to the spec.
    ///
    /// Only a spec that fails validation is returned as an error.
    pub async fn execute(&self, spec: &DeploymentSpec) -> Result<DeploymentOutcome> {
        spec.validate()?;
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &spec.target_name, self.provider.kind());
        Ok(self
            .tracked(&spec.target_name, self.reconcile(spec))
            .instrument(span)
            .await)
    }

    /// Delete the target named `name` and wait up to `timeout` for it to go.
    ///
    /// A target that does not exist is already deleted.
    pub async fn delete(&self, name: &str, timeout: Duration) -> Result<DeploymentOutcome> {
        if name.trim().is_empty() {
            return Err(ConvergeError::InvalidSpec(
                "target_name is empty".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(ConvergeError::InvalidSpec(format!(
                "timeout for {name} must be greater than zero"
            )));
        }
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, name, self.provider.kind());
        Ok(self
            .tracked(name, self.reconcile_absent(name, timeout))
            .instrument(span)
            .await)
    }

    /// Every target visible to the provider.
    pub async fn list_targets(&self) -> ProviderResult<Vec<TargetSummary>> {
        let budget = TimeoutBudget::start(self.config.call_timeout);
        budget
            .bound("list_targets", self.provider.list_targets(&budget))
            .await
    }

    async fn tracked<F>(&self, name: &str, run: F) -> DeploymentOutcome
    where
        F: std::future::Future<Output = DeploymentOutcome>,
    {
        let started = Instant::now();
        METRICS.inc_runs_started();
        obs::emit_run_started(name, self.provider.kind());

        let outcome = run.await;

        METRICS.record_outcome(outcome.status());
        obs::emit_run_finished(
            name,
            outcome.status(),
            started.elapsed().as_millis() as u64,
            outcome.no_change_detected(),
        );
        match outcome.error_message() {
            Some(message) => self.sink.log(message, LogLevel::Error),
            None => self.log_info(&format!("# {name} reconciled successfully")),
        }
        outcome
    }

    async fn reconcile(&self, spec: &DeploymentSpec) -> DeploymentOutcome {
        let name = spec.target_name.as_str();
        let budget = TimeoutBudget::start(spec.timeout);
        let builder = OutcomeBuilder::new(name);

        self.log_info(&format!("# Checking if {name} already exists"));
        let call = self.call_budget(&budget);
        let probed = match call.bound("probe", self.provider.probe(name, &call)).await {
            Ok(probed) => probed,
            Err(err) => return self.call_failed(builder, &budget, err),
        };

        match probed {
            None => {
                obs::emit_verb_decided(name, "create", false);
                self.create(spec, &budget, builder).await
            }
            Some(target) if target.status == ReconciliationStatus::RollbackComplete => {
                obs::emit_verb_decided(name, "recreate", true);
                self.recreate(spec, target, builder).await
            }
            Some(target) => {
                obs::emit_verb_decided(name, "update", true);
                self.update(spec, target, &budget, builder).await
            }
        }
    }

    async fn reconcile_absent(&self, name: &str, timeout: Duration) -> DeploymentOutcome {
        let budget = TimeoutBudget::start(timeout);
        let builder = OutcomeBuilder::new(name);

        let call = self.call_budget(&budget);
        let probed = match call.bound("probe", self.provider.probe(name, &call)).await {
            Ok(probed) => probed,
            Err(err) => return self.call_failed(builder, &budget, err),
        };
        match probed {
            None => {
                self.log_info(&format!("# {name} does not exist, nothing to delete"));
                builder.success()
            }
            Some(target) => {
                obs::emit_verb_decided(name, "delete", true);
                let builder = builder.existed_before_run(true).target_id(&target.id);
                self.delete_target(name, &target.id, &budget, builder).await
            }
        }
    }

    async fn create(
        &self,
        spec: &DeploymentSpec,
        budget: &TimeoutBudget,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        let name = spec.target_name.as_str();
        self.log_info(&format!("# Creating {name}"));

        let since = Utc::now();
        let call = self.call_budget(budget);
        let target_id = match call
            .bound("submit_create", self.provider.submit_create(spec, &call))
            .await
        {
            Ok(id) => id,
            Err(err) => return self.call_failed(builder, budget, err),
        };

        let builder = builder.target_id(&target_id);
        self.poll(PollMode::Create, spec, &target_id, since, budget, builder)
            .await
    }

    /// Delete a dead target on its own budget, then create it afresh.
    async fn recreate(
        &self,
        spec: &DeploymentSpec,
        target: TargetDescriptor,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        let name = spec.target_name.as_str();
        self.sink.log(
            &format!(
                "# {name} is in status {}, deleting it before creating it again",
                target.status_code
            ),
            LogLevel::Warn,
        );

        let delete_budget =
            TimeoutBudget::start(self.config.delete_timeout.unwrap_or(spec.timeout));
        let deleted = self
            .delete_target(
                name,
                &target.id,
                &delete_budget,
                OutcomeBuilder::new(name).target_id(&target.id),
            )
            .await;

        let builder = builder.existed_before_run(true);
        if !deleted.succeeded() {
            let builder = match deleted.final_status() {
                Some(status) => builder.final_status(status),
                None => builder,
            };
            return builder.target_id(&target.id).failure(format!(
                "Could not delete {name} in status {} before creating it again: {}",
                target.status_code,
                deleted.error_message().unwrap_or("unknown error")
            ));
        }

        let create_budget = TimeoutBudget::start(spec.timeout);
        self.create(spec, &create_budget, builder).await
    }

    async fn update(
        &self,
        spec: &DeploymentSpec,
        target: TargetDescriptor,
        budget: &TimeoutBudget,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        let name = spec.target_name.as_str();
        let builder = builder.existed_before_run(true).target_id(&target.id);

        let call = self.call_budget(budget);
        let existing = match call
            .bound("fetch_template", self.provider.fetch_template(&target.id, &call))
            .await
        {
            Ok(Some(info)) => info,
            Ok(None) => ExistingTargetInfo {
                existed: true,
                ..ExistingTargetInfo::default()
            },
            Err(err) => {
                self.sink.log(
                    &format!("# Could not record the current definition of {name}: {err}"),
                    LogLevel::Warn,
                );
                ExistingTargetInfo {
                    existed: true,
                    ..ExistingTargetInfo::default()
                }
            }
        };
        let builder = builder.existing(Some(existing));

        self.log_info(&format!(
            "# Updating {name}, currently in status {}",
            target.status_code
        ));
        let since = Utc::now();
        let call = self.call_budget(budget);
        let submission = match call
            .bound("submit_update", self.provider.submit_update(spec, &target, &call))
            .await
        {
            Ok(submission) => submission,
            Err(err) => return self.call_failed(builder, budget, err),
        };

        if submission.no_change {
            self.log_info(&format!("# No updates are to be performed on {name}"));
            let builder = builder
                .no_change_detected(true)
                .final_status(target.status);
            if spec.accepts(target.status) {
                let outputs = self.outputs_or_empty(&target.id, budget).await;
                return builder.outputs(outputs).success();
            }
            return builder.failure(format!(
                "Existing target {name} is already in status: {}, therefore exiting with failure",
                target.status_code
            ));
        }

        self.poll(PollMode::Update, spec, &target.id, since, budget, builder)
            .await
    }

    async fn delete_target(
        &self,
        name: &str,
        target_id: &str,
        budget: &TimeoutBudget,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        self.log_info(&format!("# Deleting {name}"));
        let since = Utc::now();
        let call = self.call_budget(budget);
        if let Err(err) = call
            .bound("submit_delete", self.provider.submit_delete(target_id, &call))
            .await
        {
            return self.call_failed(builder, budget, err);
        }
        self.poll_until(PollMode::Delete, name, None, target_id, since, budget, builder)
            .await
    }

    async fn poll(
        &self,
        mode: PollMode,
        spec: &DeploymentSpec,
        target_id: &str,
        since: DateTime<Utc>,
        budget: &TimeoutBudget,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        self.poll_until(
            mode,
            &spec.target_name,
            Some(spec),
            target_id,
            since,
            budget,
            builder,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll_until(
        &self,
        mode: PollMode,
        name: &str,
        spec: Option<&DeploymentSpec>,
        target_id: &str,
        since: DateTime<Utc>,
        budget: &TimeoutBudget,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        // Only events newer than this run's submission are surfaced.
        let mut cursor = EventCursor::starting_after(since);
        let mut last_status: Option<ReconciliationStatus> = None;
        let mut last_code: Option<String> = None;

        loop {
            if budget.is_expired() {
                return self
                    .timed_out(mode, name, target_id, last_code.as_deref(), budget, builder)
                    .await;
            }

            METRICS.inc_poll_ticks();
            let call = self.call_budget(budget);
            let snapshot = match call
                .bound("fetch_status", self.provider.fetch_status(target_id, &call))
                .await
            {
                Ok(snapshot) => snapshot,
                Err(ProviderError::TargetNotFound { .. }) if mode == PollMode::Delete => {
                    self.log_info(&format!("# {name} no longer exists"));
                    return builder
                        .final_status(ReconciliationStatus::DeleteComplete)
                        .success();
                }
                Err(ProviderError::TargetNotFound { id }) => {
                    return builder.failure(format!(
                        "{name} ({id}) disappeared while waiting for {mode} to complete"
                    ));
                }
                Err(err) if err.is_deadline() && budget.is_expired() => {
                    return self
                        .timed_out(mode, name, target_id, last_code.as_deref(), budget, builder)
                        .await;
                }
                Err(err) => return self.call_failed(builder, budget, err),
            };

            self.emit_events(&mut cursor, &snapshot);
            if last_status != Some(snapshot.status) {
                self.log_info(&format!("# {name} status: {}", snapshot.status_code));
                obs::emit_status_observed(name, snapshot.status, &snapshot.status_code);
                last_status = Some(snapshot.status);
            }
            last_code = Some(snapshot.status_code.clone());

            let verdict = decide(mode, snapshot.status);
            debug!(
                target_id = %target_id,
                status = %snapshot.status,
                verdict = ?verdict,
                "poll tick"
            );
            match verdict {
                Verdict::Continue => {}
                Verdict::Unrecognised => {
                    obs::emit_unknown_status(name, &snapshot.status_code);
                    self.sink.log(
                        &format!(
                            "# Unrecognised status {} for {name}, still waiting",
                            snapshot.status_code
                        ),
                        LogLevel::Warn,
                    );
                }
                Verdict::Success | Verdict::SuccessNoChange => {
                    let builder = builder
                        .final_status(snapshot.status)
                        .no_change_detected(verdict == Verdict::SuccessNoChange);
                    if mode == PollMode::Delete {
                        return builder.success();
                    }
                    let outputs = self.collect_outputs(&snapshot, budget).await;
                    return builder.outputs(outputs).success();
                }
                Verdict::Failure | Verdict::RolledBack | Verdict::Deleted => {
                    let accepted = mode == PollMode::Update
                        && spec.is_some_and(|s| s.accepts(snapshot.status));
                    let builder = builder.final_status(snapshot.status);
                    if accepted {
                        self.log_info(&format!(
                            "# Status {} of {name} is accepted as success",
                            snapshot.status_code
                        ));
                        let outputs = self.collect_outputs(&snapshot, budget).await;
                        return builder.outputs(outputs).success();
                    }
                    return builder.failure(failure_message(verdict, mode, name, &snapshot));
                }
            }

            budget.sleep(self.config.poll_interval).await;
        }
    }

    async fn timed_out(
        &self,
        mode: PollMode,
        name: &str,
        target_id: &str,
        last_code: Option<&str>,
        budget: &TimeoutBudget,
        builder: OutcomeBuilder,
    ) -> DeploymentOutcome {
        obs::emit_poll_deadline(name, budget.elapsed().as_millis() as u64);

        // Diagnostic only; the outcome is already decided.
        let diagnostic =
            TimeoutBudget::start(self.config.poll_interval.min(self.config.call_timeout));
        match diagnostic
            .bound("fetch_status", self.provider.fetch_status(target_id, &diagnostic))
            .await
        {
            Ok(snapshot) => self.sink.log(
                &format!(
                    "# Last observed status of {name}: {} ({})",
                    snapshot.status_code,
                    snapshot.reason_or_code()
                ),
                LogLevel::Warn,
            ),
            Err(err) => self.sink.log(
                &format!("# Could not read the final status of {name}: {err}"),
                LogLevel::Warn,
            ),
        }

        builder.timeout(format!(
            "{name} timed out after {}s waiting for {mode} to complete (last status: {})",
            budget.total().as_secs(),
            last_code.unwrap_or("none observed")
        ))
    }

    fn call_failed(
        &self,
        builder: OutcomeBuilder,
        budget: &TimeoutBudget,
        err: ProviderError,
    ) -> DeploymentOutcome {
        if err.is_deadline() && budget.is_expired() {
            return builder.timeout(format!(
                "timed out after {}s: {err}",
                budget.total().as_secs()
            ));
        }
        builder.failure(err.to_string())
    }

    fn emit_events(&self, cursor: &mut EventCursor, snapshot: &StatusSnapshot) {
        let fresh = cursor.advance(&snapshot.events);
        METRICS.add_events_emitted(fresh.len() as u64);
        for event in fresh {
            self.sink.log(&event.render(), LogLevel::Info);
        }
    }

    /// Outputs from the provider, on top of any carried by the snapshot.
    async fn collect_outputs(
        &self,
        snapshot: &StatusSnapshot,
        budget: &TimeoutBudget,
    ) -> BTreeMap<String, String> {
        let mut outputs = snapshot.outputs.clone();
        outputs.extend(self.outputs_or_empty(&snapshot.target_id, budget).await);
        outputs
    }

    async fn outputs_or_empty(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> BTreeMap<String, String> {
        let call = self.call_budget(budget);
        match call
            .bound("fetch_outputs", self.provider.fetch_outputs(target_id, &call))
            .await
        {
            Ok(outputs) => outputs,
            Err(err) => {
                self.sink.log(
                    &format!("# Could not fetch outputs of {target_id}: {err}"),
                    LogLevel::Warn,
                );
                BTreeMap::new()
            }
        }
    }

    fn call_budget(&self, budget: &TimeoutBudget) -> TimeoutBudget {
        budget.slice(self.config.call_timeout)
    }

    fn log_info(&self, message: &str) {
        self.sink.log(message, LogLevel::Info);
    }
}

fn failure_message(
    verdict: Verdict,
    mode: PollMode,
    name: &str,
    snapshot: &StatusSnapshot,
) -> String {
    let reason = snapshot.reason_or_code();
    match (verdict, mode) {
        (_, PollMode::Delete) => format!(
            "Failed to delete {name}, status {}: {reason}",
            snapshot.status_code
        ),
        (Verdict::RolledBack, _) => format!(
            "{name} was rolled back during {mode}, status {}: {reason}",
            snapshot.status_code
        ),
        (Verdict::Deleted, _) => format!(
            "{name} was deleted while waiting for {mode} to complete: {reason}"
        ),
        _ => format!(
            "{name} failed to {mode}, status {}: {reason}",
            snapshot.status_code
        ),
    }
}
