//! In-memory fakes for the provider and log seams (testing only)
//!
//! `ScriptedProvider` replays a scripted sequence of status reads and records
//! every call made against it; `MemoryLogSink` records operator log lines.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::budget::TimeoutBudget;
use crate::domain::{
    DeploymentSpec, ExistingTargetInfo, ProviderError, ProviderResult, ReconciliationStatus,
    StatusSnapshot, TargetDescriptor, TargetEvent, TargetSummary, UpdateSubmission,
};
use crate::log::{LogLevel, LogSink};
use crate::provider::ProviderAdapter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// One call observed by [`ScriptedProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Probe(String),
    SubmitCreate(String),
    SubmitUpdate(String),
    SubmitDelete(String),
    FetchStatus(String),
    FetchOutputs(String),
    FetchTemplate(String),
    ListTargets,
}

impl ProviderCall {
    /// Short verb, handy for asserting on call order.
    pub fn verb(&self) -> &'static str {
        match self {
            ProviderCall::Probe(_) => "probe",
            ProviderCall::SubmitCreate(_) => "create",
            ProviderCall::SubmitUpdate(_) => "update",
            ProviderCall::SubmitDelete(_) => "delete",
            ProviderCall::FetchStatus(_) => "status",
            ProviderCall::FetchOutputs(_) => "outputs",
            ProviderCall::FetchTemplate(_) => "template",
            ProviderCall::ListTargets => "list",
        }
    }
}

#[derive(Debug)]
struct Script {
    existing: Option<(ReconciliationStatus, String)>,
    target_id: String,
    statuses: VecDeque<ProviderResult<StatusSnapshot>>,
    no_change_update: bool,
    create_error: Option<ProviderError>,
    update_error: Option<ProviderError>,
    delete_error: Option<ProviderError>,
    outputs: BTreeMap<String, String>,
    template: Option<ExistingTargetInfo>,
    targets: Vec<TargetSummary>,
    status_delay: Option<Duration>,
    calls: Vec<ProviderCall>,
}

/// Provider whose answers are scripted up front.
///
/// Status reads pop from a queue; once one entry is left it is returned for
/// every further read, so a script can end on a status that never changes.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// A provider with no existing target.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                existing: None,
                target_id: "target-1".to_string(),
                statuses: VecDeque::new(),
                no_change_update: false,
                create_error: None,
                update_error: None,
                delete_error: None,
                outputs: BTreeMap::new(),
                template: None,
                targets: Vec::new(),
                status_delay: None,
                calls: Vec::new(),
            }),
        }
    }

    /// The probe finds the target in `status` (raw code `code`).
    pub fn with_existing(self, status: ReconciliationStatus, code: impl Into<String>) -> Self {
        lock(&self.script).existing = Some((status, code.into()));
        self
    }

    pub fn with_target_id(self, id: impl Into<String>) -> Self {
        lock(&self.script).target_id = id.into();
        self
    }

    /// Queue one status read with its canonical code and no events.
    pub fn then_status(self, status: ReconciliationStatus) -> Self {
        let id = lock(&self.script).target_id.clone();
        self.then_snapshot(StatusSnapshot::new(id, status, status.as_str()))
    }

    pub fn then_snapshot(self, snapshot: StatusSnapshot) -> Self {
        lock(&self.script).statuses.push_back(Ok(snapshot));
        self
    }

    /// Queue a status read carrying `events`.
    pub fn then_events(self, status: ReconciliationStatus, events: Vec<TargetEvent>) -> Self {
        let id = lock(&self.script).target_id.clone();
        self.then_snapshot(StatusSnapshot::new(id, status, status.as_str()).with_events(events))
    }

    pub fn then_error(self, error: ProviderError) -> Self {
        lock(&self.script).statuses.push_back(Err(error));
        self
    }

    /// The update submission reports that nothing needs to change.
    pub fn with_no_change_update(self) -> Self {
        lock(&self.script).no_change_update = true;
        self
    }

    pub fn failing_create(self, error: ProviderError) -> Self {
        lock(&self.script).create_error = Some(error);
        self
    }

    pub fn failing_update(self, error: ProviderError) -> Self {
        lock(&self.script).update_error = Some(error);
        self
    }

    pub fn failing_delete(self, error: ProviderError) -> Self {
        lock(&self.script).delete_error = Some(error);
        self
    }

    pub fn with_output(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        lock(&self.script).outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_template(self, info: ExistingTargetInfo) -> Self {
        lock(&self.script).template = Some(info);
        self
    }

    pub fn with_targets(self, targets: Vec<TargetSummary>) -> Self {
        lock(&self.script).targets = targets;
        self
    }

    /// Every status read takes `delay` before answering.
    pub fn with_status_delay(self, delay: Duration) -> Self {
        lock(&self.script).status_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.script).calls.clone()
    }

    /// Verbs of the mutating and lookup calls, status reads left out.
    pub fn verbs(&self) -> Vec<&'static str> {
        self.calls()
            .iter()
            .map(ProviderCall::verb)
            .filter(|v| *v != "status")
            .collect()
    }

    pub fn status_reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::FetchStatus(_)))
            .count()
    }

    fn record(&self, call: ProviderCall) {
        lock(&self.script).calls.push(call);
    }

    fn next_status(&self) -> ProviderResult<StatusSnapshot> {
        let mut script = lock(&self.script);
        let next = if script.statuses.len() > 1 {
            script.statuses.pop_front()
        } else {
            script.statuses.front().cloned()
        };
        next.unwrap_or_else(|| {
            Err(ProviderError::MalformedResponse(
                "no scripted status left".to_string(),
            ))
        })
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn probe(
        &self,
        name: &str,
        _budget: &TimeoutBudget,
    ) -> ProviderResult<Option<TargetDescriptor>> {
        self.record(ProviderCall::Probe(name.to_string()));
        let script = lock(&self.script);
        Ok(script.existing.as_ref().map(|(status, code)| {
            TargetDescriptor::existing(script.target_id.clone(), name, *status, code.clone())
        }))
    }

    async fn submit_create(
        &self,
        spec: &DeploymentSpec,
        _budget: &TimeoutBudget,
    ) -> ProviderResult<String> {
        self.record(ProviderCall::SubmitCreate(spec.target_name.clone()));
        let script = lock(&self.script);
        match &script.create_error {
            Some(err) => Err(err.clone()),
            None => Ok(script.target_id.clone()),
        }
    }

    async fn submit_update(
        &self,
        spec: &DeploymentSpec,
        target: &TargetDescriptor,
        _budget: &TimeoutBudget,
    ) -> ProviderResult<UpdateSubmission> {
        self.record(ProviderCall::SubmitUpdate(spec.target_name.clone()));
        let script = lock(&self.script);
        if let Some(err) = &script.update_error {
            return Err(err.clone());
        }
        if script.no_change_update {
            Ok(UpdateSubmission::no_change(target.id.clone()))
        } else {
            Ok(UpdateSubmission::submitted(target.id.clone()))
        }
    }

    async fn submit_delete(&self, target_id: &str, _budget: &TimeoutBudget) -> ProviderResult<()> {
        self.record(ProviderCall::SubmitDelete(target_id.to_string()));
        match &lock(&self.script).delete_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn fetch_status(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<StatusSnapshot> {
        self.record(ProviderCall::FetchStatus(target_id.to_string()));
        let delay = lock(&self.script).status_delay;
        if let Some(delay) = delay {
            budget
                .bound("fetch_status", async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
        }
        self.next_status()
    }

    async fn fetch_outputs(
        &self,
        target_id: &str,
        _budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeMap<String, String>> {
        self.record(ProviderCall::FetchOutputs(target_id.to_string()));
        Ok(lock(&self.script).outputs.clone())
    }

    async fn fetch_template(
        &self,
        target_id: &str,
        _budget: &TimeoutBudget,
    ) -> ProviderResult<Option<ExistingTargetInfo>> {
        self.record(ProviderCall::FetchTemplate(target_id.to_string()));
        Ok(lock(&self.script).template.clone())
    }

    async fn list_targets(&self, _budget: &TimeoutBudget) -> ProviderResult<Vec<TargetSummary>> {
        self.record(ProviderCall::ListTargets);
        Ok(lock(&self.script).targets.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryLogSink
// ---------------------------------------------------------------------------

/// Log sink that keeps every line in emission order.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<(String, LogLevel)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(String, LogLevel)> {
        lock(&self.lines).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.lines).iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|(m, _)| m.contains(needle))
    }

    pub fn count_at(&self, level: LogLevel) -> usize {
        lock(&self.lines).iter().filter(|(_, l)| *l == level).count()
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, message: &str, level: LogLevel) {
        lock(&self.lines).push((message.to_string(), level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_scripted_status_repeats() {
        let provider = ScriptedProvider::new()
            .then_status(ReconciliationStatus::CreateInProgress)
            .then_status(ReconciliationStatus::CreateComplete);
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        let first = provider.fetch_status("target-1", &budget).await.unwrap();
        let second = provider.fetch_status("target-1", &budget).await.unwrap();
        let third = provider.fetch_status("target-1", &budget).await.unwrap();
        assert_eq!(first.status, ReconciliationStatus::CreateInProgress);
        assert_eq!(second.status, ReconciliationStatus::CreateComplete);
        assert_eq!(third.status, ReconciliationStatus::CreateComplete);
        assert_eq!(provider.status_reads(), 3);
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryLogSink::new();
        sink.log("one", LogLevel::Info);
        sink.log("two", LogLevel::Warn);
        assert_eq!(sink.messages(), vec!["one", "two"]);
        assert_eq!(sink.count_at(LogLevel::Warn), 1);
        assert!(sink.contains("tw"));
    }
}
