//! Blue/green release operations on top of the reconciliation engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use converge_core::revision::{DELIMITER, INACTIVE_MARKER};
use converge_core::{
    next_revision, order_releases, release_name, releases_to_prune, AutoscalerAction,
    AutoscalerCoordinator, AutoscalerPolicy, ConvergeError, DeploymentOutcome, DeploymentSpec,
    EngineConfig, LogLevel, LogSink, OutcomeBuilder, ProviderAdapter, ProviderError,
    ProviderResult, ReconciliationEngine, ReleaseEntry, Result, RouteChange, RouteCoordinator,
    RouteSwap, SteadyStateChecker, SteadyStateReport, TimeoutBudget,
};

use crate::client::AppClient;
use crate::provider::AppProvider;

/// What [`AppDeployer::setup_release`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSetup {
    /// Name the spec was reconciled under; `None` when setup stopped
    /// before reaching the engine.
    pub release_name: Option<String>,
    /// Releases still present, oldest first.
    pub previous_releases: Vec<String>,
    pub pruned: Vec<String>,
    pub outcome: DeploymentOutcome,
}

impl ReleaseSetup {
    fn stopped(
        previous_releases: Vec<String>,
        pruned: Vec<String>,
        outcome: DeploymentOutcome,
    ) -> Self {
        Self {
            release_name: None,
            previous_releases,
            pruned,
            outcome,
        }
    }
}

/// Whether `name` belongs to the release history of `prefix`.
pub fn is_release_of(prefix: &str, name: &str) -> bool {
    if name == prefix {
        return true;
    }
    let Some(suffix) = name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(DELIMITER))
    else {
        return false;
    };
    suffix == INACTIVE_MARKER || (!suffix.is_empty() && suffix.parse::<u32>().is_ok())
}

pub struct AppDeployer<C> {
    provider: Arc<AppProvider<C>>,
    engine: ReconciliationEngine<Arc<AppProvider<C>>>,
    sink: Arc<dyn LogSink>,
}

impl<C: AppClient + 'static> AppDeployer<C> {
    pub fn new(
        provider: Arc<AppProvider<C>>,
        config: EngineConfig,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let engine = ReconciliationEngine::new(provider.clone(), config, sink.clone());
        Self {
            provider,
            engine,
            sink,
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine<Arc<AppProvider<C>>> {
        &self.engine
    }

    pub fn provider(&self) -> &AppProvider<C> {
        &self.provider
    }

    fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.sink.log(message, level);
    }

    /// Set up the next versioned release of `prefix`.
    ///
    /// Lists the existing releases, deletes the ones
    /// [`releases_to_prune`] selects, then reconciles `spec` under the next
    /// revision-suffixed name with whatever is left of `spec.timeout`.
    /// Provider failures end up in the returned outcome; only an invalid
    /// prefix or spec is an `Err`.
    pub async fn setup_release(&self, prefix: &str, spec: &DeploymentSpec) -> Result<ReleaseSetup> {
        if prefix.trim().is_empty() {
            return Err(ConvergeError::InvalidSpec("release prefix is empty".to_string()));
        }
        spec.validate()?;

        let budget = TimeoutBudget::start(spec.timeout);

        let call = budget.slice(self.config().call_timeout);
        let apps: Vec<_> = match self.provider.list(&call).await {
            Ok(apps) => apps
                .into_iter()
                .filter(|app| is_release_of(prefix, &app.name))
                .collect(),
            Err(err) => {
                let outcome = self.setup_failed(prefix, "list releases of", &budget, err);
                return Ok(ReleaseSetup::stopped(Vec::new(), Vec::new(), outcome));
            }
        };

        let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        let ordered = order_releases(&names);
        let guids: BTreeMap<&str, &str> =
            apps.iter().map(|a| (a.name.as_str(), a.guid.as_str())).collect();
        let history: Vec<ReleaseEntry> = ordered
            .iter()
            .filter_map(|name| {
                apps.iter()
                    .find(|a| &a.name == name)
                    .map(|a| ReleaseEntry::new(&a.name, a.instances))
            })
            .collect();
        let mut previous_releases = ordered.clone();
        let mut pruned = Vec::new();

        self.log(
            &format!("# Existing releases of {prefix}: [{}]", ordered.join(", ")),
            LogLevel::Info,
        );

        for release in releases_to_prune(&history, self.config().max_release_versions_to_keep) {
            let Some(guid) = guids.get(release.name.as_str()) else {
                continue;
            };
            self.log(&format!("# Deleting old release: {}", release.name), LogLevel::Info);
            let call = budget.slice(self.config().call_timeout);
            if let Err(err) = self.provider.submit_delete(guid, &call).await {
                let outcome = self.setup_failed(prefix, "prune releases of", &budget, err);
                return Ok(ReleaseSetup::stopped(previous_releases, pruned, outcome));
            }
            previous_releases.retain(|name| *name != release.name);
            pruned.push(release.name);
        }

        if budget.is_expired() {
            let outcome = OutcomeBuilder::new(prefix).timeout(format!(
                "Release setup of {prefix} timed out after {}s before reconciling",
                budget.total().as_secs()
            ));
            return Ok(ReleaseSetup::stopped(previous_releases, pruned, outcome));
        }

        let next = release_name(prefix, next_revision(&names));
        info!(prefix = %prefix, release = %next, pruned = pruned.len(), "setting up release");
        self.log(&format!("# New release name: {next}"), LogLevel::Info);

        let mut release = spec.renamed(&next);
        release.timeout = budget.remaining();
        let outcome = self.engine.execute(&release).await?;
        Ok(ReleaseSetup {
            release_name: Some(next),
            previous_releases,
            pruned,
            outcome,
        })
    }

    fn setup_failed(
        &self,
        prefix: &str,
        step: &str,
        budget: &TimeoutBudget,
        err: ProviderError,
    ) -> DeploymentOutcome {
        let message = format!("Failed to {step} {prefix}: {err}");
        self.log(&message, LogLevel::Error);
        let builder = OutcomeBuilder::new(prefix);
        if err.is_deadline() && budget.is_expired() {
            builder.timeout(format!(
                "Release setup of {prefix} timed out after {}s: {err}",
                budget.total().as_secs()
            ))
        } else {
            builder.failure(message)
        }
    }

    /// Scale `name` to `desired` instances and wait for steady state.
    ///
    /// Success carries `running`, `crashed` and `desired` counts as outputs.
    pub async fn resize(&self, name: &str, desired: u32, timeout: Duration) -> DeploymentOutcome {
        let budget = TimeoutBudget::start(timeout);
        let builder = OutcomeBuilder::new(name);
        let poll_interval = self.config().poll_interval;

        let call = budget.slice(self.config().call_timeout);
        let guid = match self.provider.require(name, &call).await {
            Ok(record) => record.guid,
            Err(err) => return self.resize_failed(builder, &budget, name, desired, err),
        };
        let builder = builder.existed_before_run(true).target_id(&guid);

        self.log(&format!("# Resizing {name} to {desired} instances"), LogLevel::Info);
        let call = budget.slice(self.config().call_timeout);
        if let Err(err) = self.provider.scale(&guid, desired, &call).await {
            return self.resize_failed(builder, &budget, name, desired, err);
        }

        let mut last: Option<SteadyStateReport> = None;
        loop {
            let call = budget.slice(self.config().call_timeout);
            match self.provider.instances(&guid, &call).await {
                Ok(instances) => {
                    let report = SteadyStateChecker::report(&instances, desired);
                    if last != Some(report) {
                        self.log(&format!("# {name}: {report}"), LogLevel::Info);
                    }
                    last = Some(report);
                    if report.steady {
                        return builder.outputs(report_outputs(&report)).success();
                    }
                }
                Err(err) if err.is_deadline() && budget.is_expired() => {}
                Err(err) => return self.resize_failed(builder, &budget, name, desired, err),
            }

            if budget.is_expired() {
                let last = last
                    .map_or_else(|| "no instances reported".to_string(), |r| r.to_string());
                warn!(app = %name, desired, "resize deadline reached");
                let message = format!(
                    "{name} timed out after {}s waiting for {desired} running instances (last: {last})",
                    budget.total().as_secs()
                );
                self.log(&message, LogLevel::Error);
                return builder.timeout(message);
            }
            budget.sleep(poll_interval).await;
        }
    }

    fn resize_failed(
        &self,
        builder: OutcomeBuilder,
        budget: &TimeoutBudget,
        name: &str,
        desired: u32,
        err: ProviderError,
    ) -> DeploymentOutcome {
        let message = format!("Failed to resize {name} to {desired} instances: {err}");
        self.log(&message, LogLevel::Error);
        if err.is_deadline() && budget.is_expired() {
            builder.timeout(format!(
                "{name} timed out after {}s: {err}",
                budget.total().as_secs()
            ))
        } else {
            builder.failure(message)
        }
    }

    /// Attach `routes` to `new_app` and detach them from `old_app`.
    pub async fn swap_routes(
        &self,
        old_app: &str,
        new_app: &str,
        routes: &BTreeSet<String>,
        timeout: Duration,
    ) -> ProviderResult<RouteSwap> {
        let budget = TimeoutBudget::start(timeout);
        let swap = RouteCoordinator::new(self.provider.clone())
            .swap(old_app, new_app, routes, &budget)
            .await?;
        for route in &swap.attached_to_new {
            self.log(&format!("# Mapped {route} to {new_app}"), LogLevel::Info);
        }
        for route in &swap.detached_from_old {
            self.log(&format!("# Unmapped {route} from {old_app}"), LogLevel::Info);
        }
        Ok(swap)
    }

    /// Make `app`'s routes exactly `desired`.
    pub async fn reconcile_routes(
        &self,
        app: &str,
        desired: &BTreeSet<String>,
        timeout: Duration,
    ) -> ProviderResult<RouteChange> {
        let budget = TimeoutBudget::start(timeout);
        RouteCoordinator::new(self.provider.clone())
            .reconcile(app, desired, &budget)
            .await
    }

    /// Bring `app`'s autoscaler to `desired`; `None` removes it.
    pub async fn configure_autoscaler(
        &self,
        app: &str,
        desired: Option<&AutoscalerPolicy>,
        timeout: Duration,
    ) -> ProviderResult<AutoscalerAction> {
        let budget = TimeoutBudget::start(timeout);
        let action = AutoscalerCoordinator::new(self.provider.clone())
            .reconcile(app, desired, &budget)
            .await?;
        if action != AutoscalerAction::Unchanged {
            self.log(&format!("# Autoscaler of {app}: {action:?}"), LogLevel::Info);
        }
        Ok(action)
    }

    /// Delete a release and wait until it is gone.
    pub async fn delete_release(&self, name: &str, timeout: Duration) -> Result<DeploymentOutcome> {
        self.engine.delete(name, timeout).await
    }
}

fn report_outputs(report: &SteadyStateReport) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("running".to_string(), report.running.to_string()),
        ("crashed".to_string(), report.crashed.to_string()),
        ("desired".to_string(), report.desired.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_membership_requires_delimiter_and_known_suffix() {
        assert!(is_release_of("shop", "shop"));
        assert!(is_release_of("shop", "shop__0"));
        assert!(is_release_of("shop", "shop__12"));
        assert!(is_release_of("shop", "shop__INACTIVE"));

        assert!(!is_release_of("shop", "shopping__1"));
        assert!(!is_release_of("shop", "shop__"));
        assert!(!is_release_of("shop", "shop__blue"));
        assert!(!is_release_of("shop", "shop_1"));
    }

    #[test]
    fn report_outputs_carry_counts() {
        let outputs = report_outputs(&SteadyStateReport {
            running: 2,
            crashed: 0,
            desired: 2,
            steady: true,
        });
        assert_eq!(outputs.get("running").map(String::as_str), Some("2"));
        assert_eq!(outputs.get("desired").map(String::as_str), Some("2"));
    }
}
