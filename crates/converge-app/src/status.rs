//! Status derivation for platform applications.
//!
//! The platform has no single lifecycle status. One is derived from the
//! package staging state, the instance states and which verb the caller is
//! waiting on.

use sha2::{Digest, Sha256};

use converge_core::{AppInstance, ReconciliationStatus, SteadyStateChecker, TemplateSource};

use crate::client::{AppRecord, AppState, PackageState, PushRequest};

/// Label carrying the digest of the definition an application was pushed
/// with.
pub const MANIFEST_DIGEST_LABEL: &str = "converge.io/manifest-digest";

/// Verb a caller submitted and is now waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingVerb {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedStatus {
    pub status: ReconciliationStatus,
    pub code: String,
    pub reason: Option<String>,
}

/// Raw code shown to operators, e.g. `STARTED/STAGED`.
pub fn status_code(record: &AppRecord) -> String {
    format!("{}/{}", record.state, record.package_state)
}

/// Instance count the platform should converge to.
pub fn desired_instances(record: &AppRecord) -> u32 {
    match record.state {
        AppState::Started => record.instances,
        AppState::Stopped => 0,
    }
}

/// Whether deriving a status needs the instance list.
pub fn needs_instances(record: &AppRecord) -> bool {
    record.package_state == PackageState::Staged && desired_instances(record) > 0
}

/// Derive the lifecycle status.
///
/// With no pending verb the application is described as its creation:
/// a settled, healthy app reads `CreateComplete`.
pub fn derive_status(
    record: &AppRecord,
    instances: &[AppInstance],
    verb: Option<PendingVerb>,
) -> DerivedStatus {
    let verb = verb.unwrap_or(PendingVerb::Create);
    let (in_progress, complete, failed) = match verb {
        PendingVerb::Create => (
            ReconciliationStatus::CreateInProgress,
            ReconciliationStatus::CreateComplete,
            ReconciliationStatus::CreateFailed,
        ),
        PendingVerb::Update => (
            ReconciliationStatus::UpdateInProgress,
            ReconciliationStatus::UpdateComplete,
            ReconciliationStatus::UpdateFailed,
        ),
    };
    let code = status_code(record);

    match record.package_state {
        PackageState::Failed => DerivedStatus {
            status: failed,
            code,
            reason: Some(
                record
                    .staging_error
                    .clone()
                    .unwrap_or_else(|| "staging failed".to_string()),
            ),
        },
        PackageState::Pending => DerivedStatus {
            status: in_progress,
            code,
            reason: Some("staging".to_string()),
        },
        PackageState::Staged => {
            let report = SteadyStateChecker::report(instances, desired_instances(record));
            let status = if report.crashed > 0 {
                failed
            } else if report.steady {
                complete
            } else {
                in_progress
            };
            DerivedStatus {
                status,
                code,
                reason: Some(report.to_string()),
            }
        }
    }
}

/// Classify a raw `STATE/PACKAGE` code on its own.
///
/// Without instance data a staged app reads as settled. Anything that does
/// not parse is `Unknown`.
pub fn classify_code(code: &str) -> ReconciliationStatus {
    let Some((state, package)) = code.trim().split_once('/') else {
        return ReconciliationStatus::Unknown;
    };
    if !matches!(state, "STARTED" | "STOPPED") {
        return ReconciliationStatus::Unknown;
    }
    match package {
        "PENDING" => ReconciliationStatus::CreateInProgress,
        "STAGED" => ReconciliationStatus::CreateComplete,
        "FAILED" => ReconciliationStatus::CreateFailed,
        _ => ReconciliationStatus::Unknown,
    }
}

/// Digest of everything a push request would change.
pub fn manifest_digest(request: &PushRequest) -> String {
    let mut hasher = Sha256::new();
    match &request.manifest {
        TemplateSource::Body(body) => {
            hasher.update(b"body\n");
            hasher.update(body.as_bytes());
        }
        TemplateSource::Url(url) => {
            hasher.update(b"url\n");
            hasher.update(url.as_bytes());
        }
    }
    hasher.update(b"\n");
    for (key, value) in &request.env {
        hasher.update(format!("env {key}={value}\n").as_bytes());
    }
    for (key, value) in request
        .labels
        .iter()
        .filter(|(k, _)| k.as_str() != MANIFEST_DIGEST_LABEL)
    {
        hasher.update(format!("label {key}={value}\n").as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Whether the application was pushed with exactly this request.
pub fn is_unchanged(record: &AppRecord, request: &PushRequest) -> bool {
    record
        .labels
        .get(MANIFEST_DIGEST_LABEL)
        .is_some_and(|digest| *digest == manifest_digest(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use converge_core::InstanceState;
    use std::collections::BTreeMap;

    fn record(package_state: PackageState, instances: u32) -> AppRecord {
        AppRecord {
            guid: "guid-1".to_string(),
            name: "shop__2".to_string(),
            state: AppState::Started,
            package_state,
            staging_error: None,
            instances,
            manifest: None,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    fn request(body: &str) -> PushRequest {
        PushRequest {
            name: "shop__2".to_string(),
            manifest: TemplateSource::Body(body.to_string()),
            env: BTreeMap::from([("PROFILE".to_string(), "prod".to_string())]),
            labels: BTreeMap::new(),
            instances: 0,
        }
    }

    #[test]
    fn staging_is_in_progress_for_the_pending_verb() {
        let pending = record(PackageState::Pending, 1);
        assert_eq!(
            derive_status(&pending, &[], Some(PendingVerb::Update)).status,
            ReconciliationStatus::UpdateInProgress
        );
        assert_eq!(
            derive_status(&pending, &[], None).status,
            ReconciliationStatus::CreateInProgress
        );
        assert_eq!(status_code(&pending), "STARTED/PENDING");
    }

    #[test]
    fn staging_failure_carries_platform_reason() {
        let mut failed = record(PackageState::Failed, 1);
        failed.staging_error = Some("buildpack compile failed".to_string());
        let derived = derive_status(&failed, &[], Some(PendingVerb::Create));
        assert_eq!(derived.status, ReconciliationStatus::CreateFailed);
        assert_eq!(derived.reason.as_deref(), Some("buildpack compile failed"));
    }

    #[test]
    fn staged_app_completes_once_instances_are_steady() {
        let staged = record(PackageState::Staged, 2);
        let starting = [
            AppInstance::new(0, InstanceState::Running),
            AppInstance::new(1, InstanceState::Starting),
        ];
        assert_eq!(
            derive_status(&staged, &starting, Some(PendingVerb::Update)).status,
            ReconciliationStatus::UpdateInProgress
        );

        let running = [
            AppInstance::new(0, InstanceState::Running),
            AppInstance::new(1, InstanceState::Running),
        ];
        assert_eq!(
            derive_status(&staged, &running, Some(PendingVerb::Update)).status,
            ReconciliationStatus::UpdateComplete
        );
    }

    #[test]
    fn crashed_instance_fails_the_verb() {
        let staged = record(PackageState::Staged, 2);
        let instances = [
            AppInstance::new(0, InstanceState::Running),
            AppInstance::new(1, InstanceState::Crashed),
        ];
        let derived = derive_status(&staged, &instances, Some(PendingVerb::Create));
        assert_eq!(derived.status, ReconciliationStatus::CreateFailed);
        assert_eq!(
            derived.reason.as_deref(),
            Some("1/2 instances running, 1 crashed")
        );
    }

    #[test]
    fn zero_instance_release_is_complete_when_staged() {
        let staged = record(PackageState::Staged, 0);
        assert!(!needs_instances(&staged));
        assert_eq!(
            derive_status(&staged, &[], Some(PendingVerb::Create)).status,
            ReconciliationStatus::CreateComplete
        );

        let mut stopped = record(PackageState::Staged, 3);
        stopped.state = AppState::Stopped;
        assert_eq!(desired_instances(&stopped), 0);
    }

    #[test]
    fn raw_codes_classify_without_instances() {
        assert_eq!(classify_code("STARTED/STAGED"), ReconciliationStatus::CreateComplete);
        assert_eq!(classify_code("STOPPED/PENDING"), ReconciliationStatus::CreateInProgress);
        assert_eq!(classify_code("STARTED/FAILED"), ReconciliationStatus::CreateFailed);
        assert_eq!(classify_code("STARTED"), ReconciliationStatus::Unknown);
        assert_eq!(classify_code("CRASHED/STAGED"), ReconciliationStatus::Unknown);
    }

    #[test]
    fn digest_tracks_definition_not_its_own_label() {
        let base = request("applications: [{name: shop}]");
        let digest = manifest_digest(&base);
        assert_eq!(digest.len(), 64);

        let mut labelled = base.clone();
        labelled
            .labels
            .insert(MANIFEST_DIGEST_LABEL.to_string(), digest.clone());
        assert_eq!(manifest_digest(&labelled), digest);

        let changed = request("applications: [{name: shop, memory: 1G}]");
        assert_ne!(manifest_digest(&changed), digest);

        let mut pushed = record(PackageState::Staged, 0);
        pushed.labels = labelled.labels;
        assert!(is_unchanged(&pushed, &base));
        assert!(!is_unchanged(&pushed, &changed));
    }
}
