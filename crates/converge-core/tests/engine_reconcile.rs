//! End-to-end reconciliation runs against the scripted provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use converge_core::fakes::{MemoryLogSink, ProviderCall, ScriptedProvider};
use converge_core::{
    DeploymentSpec, EngineConfig, ExistingTargetInfo, LogLevel, OutcomeStatus, Parameter,
    ProviderError, ReconciliationEngine, ReconciliationStatus as S, StatusSnapshot, TargetEvent,
    TargetSummary, TemplateSource,
};
use tokio::time::Instant;

const POLL: Duration = Duration::from_secs(10);

fn spec(timeout_secs: u64) -> DeploymentSpec {
    DeploymentSpec::new(
        "network-stack",
        TemplateSource::Body("{\"Resources\":{}}".to_string()),
        Duration::from_secs(timeout_secs),
    )
    .with_parameter("Env", "prod")
}

type Harness = (
    ReconciliationEngine<Arc<ScriptedProvider>>,
    Arc<ScriptedProvider>,
    Arc<MemoryLogSink>,
);

fn harness(provider: ScriptedProvider) -> Harness {
    let provider = Arc::new(provider);
    let sink = Arc::new(MemoryLogSink::new());
    let engine = ReconciliationEngine::new(
        provider.clone(),
        EngineConfig::default().with_poll_interval(POLL),
        sink.clone(),
    );
    (engine, provider, sink)
}

/// Scripted events are stamped after any run start.
fn event(secs: i64, resource: &str, status: &str) -> TargetEvent {
    let base = Utc.with_ymd_and_hms(2100, 3, 1, 12, 0, 0).unwrap();
    TargetEvent::new(base + chrono::Duration::seconds(secs), resource, status, None)
}

// ---------------------------------------------------------------------------
// Create path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn absent_target_is_created_and_outputs_collected() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .then_status(S::CreateInProgress)
            .then_status(S::CreateComplete)
            .with_output("VpcId", "vpc-123"),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Success);
    assert!(!outcome.existed_before_run());
    assert_eq!(outcome.target_id(), Some("target-1"));
    assert_eq!(outcome.outputs().get("VpcId").map(String::as_str), Some("vpc-123"));
    assert_eq!(outcome.final_status(), Some(S::CreateComplete));
    assert!(outcome.error_message().is_none());
    assert_eq!(provider.verbs(), vec!["probe", "create", "outputs"]);
    assert_eq!(provider.status_reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn create_failure_message_carries_reason_and_name() {
    let id = "target-1";
    let (engine, _provider, sink) = harness(
        ScriptedProvider::new()
            .then_status(S::CreateInProgress)
            .then_snapshot(
                StatusSnapshot::new(id, S::CreateFailed, "CREATE_FAILED")
                    .with_reason("Bucket example already exists"),
            ),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    let message = outcome.error_message().expect("failure has a message");
    assert!(message.contains("Bucket example already exists"), "{message}");
    assert!(message.contains("network-stack"), "{message}");
    assert!(sink.lines().contains(&(message.to_string(), LogLevel::Error)));
}

#[tokio::test(start_paused = true)]
async fn create_path_ignores_accepted_statuses() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new().then_status(S::RollbackComplete),
    );
    let accepting = spec(600).with_success_status(S::RollbackComplete);

    let outcome = engine.execute(&accepting).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("rolled back"));
}

#[tokio::test(start_paused = true)]
async fn submit_error_becomes_failure_outcome() {
    let (engine, provider, _sink) = harness(ScriptedProvider::new().failing_create(
        ProviderError::Rejected {
            operation: "CreateStack".to_string(),
            message: "Template format error".to_string(),
        },
    ));

    let outcome = engine.execute(&spec(600)).await.expect("errors are outcomes");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("Template format error"));
    assert_eq!(provider.status_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn vanished_target_during_create_is_a_failure() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new()
            .then_status(S::CreateInProgress)
            .then_error(ProviderError::TargetNotFound {
                id: "target-1".to_string(),
            }),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("disappeared"));
}

#[tokio::test]
async fn invalid_spec_is_the_only_error() {
    let (engine, provider, _sink) = harness(ScriptedProvider::new());
    let zero = DeploymentSpec::new(
        "network-stack",
        TemplateSource::Url("https://templates.example.com/vpc.json".to_string()),
        Duration::ZERO,
    );

    assert!(engine.execute(&zero).await.is_err());
    assert!(provider.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Update path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn no_change_update_with_accepted_status_succeeds_without_polling() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::UpdateComplete, "UPDATE_COMPLETE")
            .with_no_change_update(),
    );
    let accepting = spec(600).with_success_status(S::UpdateComplete);

    let outcome = engine.execute(&accepting).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Success);
    assert!(outcome.no_change_detected());
    assert!(outcome.existed_before_run());
    assert_eq!(provider.status_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_change_update_with_unaccepted_status_fails() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::RollbackFailed, "UPDATE_ROLLBACK_FAILED")
            .with_no_change_update(),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.no_change_detected());
    assert_eq!(
        outcome.error_message(),
        Some(
            "Existing target network-stack is already in status: UPDATE_ROLLBACK_FAILED, \
             therefore exiting with failure"
        )
    );
    assert_eq!(provider.status_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_records_previous_definition() {
    let previous = ExistingTargetInfo {
        existed: true,
        previous_template: Some("{\"old\":true}".to_string()),
        previous_parameters: vec![Parameter::new("Env", "staging")],
    };
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::CreateComplete, "CREATE_COMPLETE")
            .with_template(previous.clone())
            .then_status(S::UpdateInProgress)
            .then_status(S::UpdateCleanupInProgress)
            .then_status(S::UpdateComplete),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert!(outcome.succeeded());
    assert_eq!(outcome.existing(), Some(&previous));
    assert_eq!(
        provider.verbs(),
        vec!["probe", "template", "update", "outputs"]
    );
}

#[tokio::test(start_paused = true)]
async fn update_rollback_accepted_by_caller_is_success() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::UpdateComplete, "UPDATE_COMPLETE")
            .then_status(S::UpdateInProgress)
            .then_status(S::UpdateRollbackComplete),
    );
    let accepting = spec(600).with_success_status(S::UpdateRollbackComplete);

    let outcome = engine.execute(&accepting).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Success);
    assert_eq!(outcome.final_status(), Some(S::UpdateRollbackComplete));
    assert!(provider.verbs().contains(&"outputs"));
}

#[tokio::test(start_paused = true)]
async fn update_rollback_without_acceptance_fails() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::UpdateComplete, "UPDATE_COMPLETE")
            .then_status(S::UpdateRollbackComplete),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("rolled back"));
}

#[tokio::test(start_paused = true)]
async fn update_rollback_complete_target_is_updated_not_recreated() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::UpdateRollbackComplete, "UPDATE_ROLLBACK_COMPLETE")
            .then_status(S::UpdateComplete),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert!(outcome.succeeded());
    assert!(!provider.verbs().contains(&"delete"));
    assert!(provider.verbs().contains(&"update"));
}

// ---------------------------------------------------------------------------
// Dead-state recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rollback_complete_target_is_deleted_then_created() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::RollbackComplete, "ROLLBACK_COMPLETE")
            .then_status(S::DeleteInProgress)
            .then_status(S::DeleteComplete)
            .then_status(S::CreateInProgress)
            .then_status(S::CreateComplete),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert!(outcome.succeeded());
    assert!(outcome.existed_before_run());
    assert_eq!(provider.verbs(), vec!["probe", "delete", "create", "outputs"]);
    assert!(!provider
        .calls()
        .iter()
        .any(|c| matches!(c, ProviderCall::SubmitUpdate(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_dead_state_delete_never_creates() {
    let (engine, provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::RollbackComplete, "ROLLBACK_COMPLETE")
            .then_snapshot(
                StatusSnapshot::new("target-1", S::DeleteFailed, "DELETE_FAILED")
                    .with_reason("resource in use"),
            ),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("resource in use"));
    assert_eq!(provider.verbs(), vec!["probe", "delete"]);
}

#[tokio::test(start_paused = true)]
async fn dead_state_delete_uses_its_own_budget() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_existing(S::RollbackComplete, "ROLLBACK_COMPLETE")
            .then_status(S::DeleteInProgress),
    );
    let sink = Arc::new(MemoryLogSink::new());
    let engine = ReconciliationEngine::new(
        provider.clone(),
        EngineConfig::default()
            .with_poll_interval(POLL)
            .with_delete_timeout(Duration::from_secs(30)),
        sink,
    );
    let started = Instant::now();

    let outcome = engine.execute(&spec(3600)).await.expect("valid spec");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(!provider.verbs().contains(&"create"));
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stuck_create_times_out_within_one_poll_interval() {
    let (engine, _provider, sink) =
        harness(ScriptedProvider::new().then_status(S::CreateInProgress));
    let started = Instant::now();

    let outcome = engine.execute(&spec(45)).await.expect("valid spec");
    let elapsed = started.elapsed();

    assert_eq!(outcome.status(), OutcomeStatus::Timeout);
    assert!(outcome.status().is_failure());
    assert!(outcome.error_message().unwrap().contains("timed out"));
    assert!(elapsed >= Duration::from_secs(45), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(45) + POLL, "{elapsed:?}");
    assert!(sink.contains("Last observed status of network-stack: CREATE_IN_PROGRESS"));
}

#[tokio::test(start_paused = true)]
async fn hanging_status_call_is_cut_at_the_deadline() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new()
            .then_status(S::CreateInProgress)
            .with_status_delay(Duration::from_secs(3600)),
    );
    let started = Instant::now();

    let outcome = engine.execute(&spec(20)).await.expect("valid spec");

    assert!(outcome.timed_out());
    assert!(started.elapsed() <= Duration::from_secs(20) + POLL);
}

// ---------------------------------------------------------------------------
// Events and unknown statuses
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn overlapping_event_batches_are_emitted_once_in_order() {
    let (engine, _provider, sink) = harness(
        ScriptedProvider::new()
            .then_events(
                S::CreateInProgress,
                vec![event(1, "Vpc", "CREATE_IN_PROGRESS")],
            )
            .then_events(
                S::CreateInProgress,
                vec![
                    event(1, "Vpc", "CREATE_IN_PROGRESS"),
                    event(3, "Subnet", "CREATE_IN_PROGRESS"),
                    event(2, "Vpc", "CREATE_COMPLETE"),
                ],
            )
            .then_events(
                S::CreateComplete,
                vec![
                    event(2, "Vpc", "CREATE_COMPLETE"),
                    event(3, "Subnet", "CREATE_IN_PROGRESS"),
                    event(4, "Subnet", "CREATE_COMPLETE"),
                ],
            ),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");
    assert!(outcome.succeeded());

    let rendered: Vec<String> = sink
        .messages()
        .into_iter()
        .filter(|m| m.starts_with('['))
        .collect();
    let expected: Vec<String> = [
        event(1, "Vpc", "CREATE_IN_PROGRESS"),
        event(2, "Vpc", "CREATE_COMPLETE"),
        event(3, "Subnet", "CREATE_IN_PROGRESS"),
        event(4, "Subnet", "CREATE_COMPLETE"),
    ]
    .iter()
    .map(TargetEvent::render)
    .collect();
    assert_eq!(rendered, expected);
}

#[tokio::test(start_paused = true)]
async fn update_skips_events_from_before_the_run() {
    let earlier = TargetEvent::new(
        Utc::now() - chrono::Duration::hours(1),
        "Vpc",
        "CREATE_COMPLETE",
        None,
    );
    let (engine, _provider, sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::CreateComplete, "CREATE_COMPLETE")
            .then_events(
                S::UpdateComplete,
                vec![earlier.clone(), event(1, "Vpc", "UPDATE_COMPLETE")],
            ),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");
    assert!(outcome.succeeded());

    let messages = sink.messages();
    assert!(!messages.contains(&earlier.render()));
    assert!(messages.contains(&event(1, "Vpc", "UPDATE_COMPLETE").render()));
}

#[tokio::test(start_paused = true)]
async fn unknown_status_keeps_polling_with_warning() {
    let (engine, _provider, sink) = harness(
        ScriptedProvider::new()
            .then_snapshot(StatusSnapshot::new("target-1", S::Unknown, "IMPORT_IN_PROGRESS"))
            .then_status(S::CreateComplete),
    );

    let outcome = engine.execute(&spec(600)).await.expect("valid spec");

    assert!(outcome.succeeded());
    assert!(sink
        .lines()
        .iter()
        .any(|(m, l)| *l == LogLevel::Warn && m.contains("IMPORT_IN_PROGRESS")));
}

#[tokio::test(start_paused = true)]
async fn status_transitions_are_logged_once_each() {
    let (engine, _provider, sink) = harness(
        ScriptedProvider::new()
            .then_status(S::CreateInProgress)
            .then_status(S::CreateInProgress)
            .then_status(S::CreateComplete),
    );

    engine.execute(&spec(600)).await.expect("valid spec");

    let transitions: Vec<String> = sink
        .messages()
        .into_iter()
        .filter(|m| m.starts_with("# network-stack status:"))
        .collect();
    assert_eq!(
        transitions,
        vec![
            "# network-stack status: CREATE_IN_PROGRESS",
            "# network-stack status: CREATE_COMPLETE"
        ]
    );
}

// ---------------------------------------------------------------------------
// Standalone delete and listing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn deleting_absent_target_succeeds() {
    let (engine, provider, _sink) = harness(ScriptedProvider::new());

    let outcome = engine
        .delete("network-stack", Duration::from_secs(60))
        .await
        .expect("valid name");

    assert!(outcome.succeeded());
    assert_eq!(provider.verbs(), vec!["probe"]);
}

#[tokio::test(start_paused = true)]
async fn delete_waits_until_target_is_gone() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::CreateComplete, "CREATE_COMPLETE")
            .then_status(S::DeleteInProgress)
            .then_error(ProviderError::TargetNotFound {
                id: "target-1".to_string(),
            }),
    );

    let outcome = engine
        .delete("network-stack", Duration::from_secs(60))
        .await
        .expect("valid name");

    assert!(outcome.succeeded());
    assert_eq!(outcome.final_status(), Some(S::DeleteComplete));
}

#[tokio::test(start_paused = true)]
async fn delete_failed_is_a_failure() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::CreateComplete, "CREATE_COMPLETE")
            .then_status(S::DeleteFailed),
    );

    let outcome = engine
        .delete("network-stack", Duration::from_secs(60))
        .await
        .expect("valid name");

    assert_eq!(outcome.status(), OutcomeStatus::Failure);
    assert!(outcome.error_message().unwrap().contains("network-stack"));
}

#[tokio::test(start_paused = true)]
async fn stuck_delete_times_out() {
    let (engine, _provider, _sink) = harness(
        ScriptedProvider::new()
            .with_existing(S::CreateComplete, "CREATE_COMPLETE")
            .then_status(S::DeleteInProgress),
    );

    let outcome = engine
        .delete("network-stack", Duration::from_secs(30))
        .await
        .expect("valid name");

    assert!(outcome.timed_out());
}

#[tokio::test]
async fn list_targets_passes_through() {
    let summary = TargetSummary {
        id: "arn:stack/network".to_string(),
        name: "network-stack".to_string(),
        status: S::CreateComplete,
        status_code: "CREATE_COMPLETE".to_string(),
        status_reason: None,
    };
    let (engine, _provider, _sink) =
        harness(ScriptedProvider::new().with_targets(vec![summary.clone()]));

    assert_eq!(engine.list_targets().await.expect("listed"), vec![summary]);
}
