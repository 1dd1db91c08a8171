//! [`ProviderAdapter`] over a callback-style application platform.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use converge_core::{
    await_completion, AppInstance, AutoscalerBackend, AutoscalerPolicy, DeploymentSpec,
    ExistingTargetInfo, Parameter, ProviderAdapter, ProviderError, ProviderResult,
    RouteBackend, StatusSnapshot, TargetDescriptor, TargetEvent, TargetSummary, TimeoutBudget,
    UpdateSubmission,
};

use crate::client::{AppClient, AppConnection, AppRecord, PushRequest};
use crate::status::{
    derive_status, is_unchanged, manifest_digest, needs_instances, PendingVerb,
    MANIFEST_DIGEST_LABEL,
};

/// App-style provider adapter.
///
/// Remembers which verb was last submitted per application so a status read
/// can tell an update's staging from a create's.
pub struct AppProvider<C> {
    client: C,
    connection: AppConnection,
    initial_instances: u32,
    pending: Mutex<HashMap<String, PendingVerb>>,
}

impl<C: AppClient> AppProvider<C> {
    pub fn new(client: C, connection: AppConnection) -> Self {
        Self {
            client,
            connection,
            initial_instances: 0,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Instance count new applications are pushed with. Defaults to zero;
    /// releases are scaled up separately.
    pub fn with_initial_instances(mut self, instances: u32) -> Self {
        self.initial_instances = instances;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn connection(&self) -> &AppConnection {
        &self.connection
    }

    fn push_request(&self, spec: &DeploymentSpec) -> PushRequest {
        let mut request = PushRequest {
            name: spec.target_name.clone(),
            manifest: spec.template.clone(),
            env: spec
                .parameters
                .iter()
                .map(|p| (p.key.clone(), p.value.clone()))
                .collect(),
            labels: spec.tags.clone(),
            instances: self.initial_instances,
        };
        let digest = manifest_digest(&request);
        request
            .labels
            .insert(MANIFEST_DIGEST_LABEL.to_string(), digest);
        request
    }

    fn pending_verb(&self, guid: &str) -> Option<PendingVerb> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(guid)
            .copied()
    }

    fn set_pending(&self, guid: &str, verb: Option<PendingVerb>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match verb {
            Some(verb) => pending.insert(guid.to_string(), verb),
            None => pending.remove(guid),
        };
    }

    pub async fn find(
        &self,
        name_or_guid: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<AppRecord>> {
        await_completion("GetApplication", budget, |done| {
            self.client.get_application(name_or_guid, done)
        })
        .await
    }

    /// Like [`Self::find`], but a missing application is `TargetNotFound`.
    pub async fn require(
        &self,
        name_or_guid: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<AppRecord> {
        self.find(name_or_guid, budget)
            .await?
            .ok_or_else(|| ProviderError::TargetNotFound {
                id: name_or_guid.to_string(),
            })
    }

    pub async fn list(&self, budget: &TimeoutBudget) -> ProviderResult<Vec<AppRecord>> {
        await_completion("ListApplications", budget, |done| {
            self.client.list_applications(done)
        })
        .await
    }

    pub async fn instances(
        &self,
        guid: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Vec<AppInstance>> {
        await_completion("GetInstances", budget, |done| {
            self.client.get_instances(guid, done)
        })
        .await
    }

    pub async fn scale(
        &self,
        guid: &str,
        instances: u32,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        await_completion("ScaleApplication", budget, |done| {
            self.client.scale_application(guid, instances, done)
        })
        .await?;
        info!(guid = %guid, instances, "scale submitted");
        Ok(())
    }

    async fn instances_if_needed(
        &self,
        record: &AppRecord,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Vec<AppInstance>> {
        if needs_instances(record) {
            self.instances(&record.guid, budget).await
        } else {
            Ok(Vec::new())
        }
    }

    async fn summarize(
        &self,
        record: &AppRecord,
        budget: &TimeoutBudget,
    ) -> ProviderResult<TargetSummary> {
        let instances = self.instances_if_needed(record, budget).await?;
        let derived = derive_status(record, &instances, self.pending_verb(&record.guid));
        Ok(TargetSummary {
            id: record.guid.clone(),
            name: record.name.clone(),
            status: derived.status,
            status_code: derived.code,
            status_reason: derived.reason,
        })
    }
}

#[async_trait]
impl<C: AppClient> ProviderAdapter for AppProvider<C> {
    fn kind(&self) -> &'static str {
        "app"
    }

    async fn probe(
        &self,
        name: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<TargetDescriptor>> {
        let Some(record) = self.find(name, budget).await? else {
            return Ok(None);
        };
        let summary = self.summarize(&record, budget).await?;
        Ok(Some(TargetDescriptor::existing(
            summary.id,
            summary.name,
            summary.status,
            summary.status_code,
        )))
    }

    async fn submit_create(
        &self,
        spec: &DeploymentSpec,
        budget: &TimeoutBudget,
    ) -> ProviderResult<String> {
        let request = self.push_request(spec);
        let record = await_completion("PushApplication", budget, |done| {
            self.client.push_application(&request, done)
        })
        .await?;
        self.set_pending(&record.guid, Some(PendingVerb::Create));
        info!(
            app = %spec.target_name,
            guid = %record.guid,
            org = %self.connection.org,
            space = %self.connection.space,
            "push submitted"
        );
        Ok(record.guid)
    }

    async fn submit_update(
        &self,
        spec: &DeploymentSpec,
        target: &TargetDescriptor,
        budget: &TimeoutBudget,
    ) -> ProviderResult<UpdateSubmission> {
        let request = self.push_request(spec);
        let current = self.require(&target.id, budget).await?;
        if is_unchanged(&current, &request) {
            info!(app = %spec.target_name, "definition unchanged, nothing to update");
            return Ok(UpdateSubmission::no_change(target.id.clone()));
        }

        let record = await_completion("UpdateApplication", budget, |done| {
            self.client.update_application(&target.id, &request, done)
        })
        .await?;
        self.set_pending(&record.guid, Some(PendingVerb::Update));
        info!(app = %spec.target_name, guid = %record.guid, "update submitted");
        Ok(UpdateSubmission::submitted(record.guid))
    }

    async fn submit_delete(&self, target_id: &str, budget: &TimeoutBudget) -> ProviderResult<()> {
        await_completion("DeleteApplication", budget, |done| {
            self.client.delete_application(target_id, done)
        })
        .await?;
        self.set_pending(target_id, None);
        Ok(())
    }

    async fn fetch_status(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<StatusSnapshot> {
        let record = self.require(target_id, budget).await?;
        let instances = self.instances_if_needed(&record, budget).await?;
        let lines = await_completion("RecentLogs", budget, |done| {
            self.client.recent_logs(target_id, done)
        })
        .await?;

        let derived = derive_status(&record, &instances, self.pending_verb(target_id));
        debug!(guid = %target_id, code = %derived.code, status = %derived.status, "app described");

        let events = lines
            .into_iter()
            .map(|line| TargetEvent::new(line.timestamp, line.source, line.message, None))
            .collect();
        let mut snapshot =
            StatusSnapshot::new(target_id, derived.status, derived.code).with_events(events);
        snapshot.status_reason = derived.reason;
        Ok(snapshot)
    }

    async fn fetch_outputs(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeMap<String, String>> {
        Ok(self.require(target_id, budget).await?.env)
    }

    async fn fetch_template(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<ExistingTargetInfo>> {
        let Some(record) = self.find(target_id, budget).await? else {
            return Ok(None);
        };
        Ok(Some(ExistingTargetInfo {
            existed: true,
            previous_template: record.manifest,
            previous_parameters: record
                .env
                .into_iter()
                .map(|(key, value)| Parameter::new(key, value))
                .collect(),
        }))
    }

    async fn list_targets(&self, budget: &TimeoutBudget) -> ProviderResult<Vec<TargetSummary>> {
        let mut summaries = Vec::new();
        for record in self.list(budget).await? {
            summaries.push(self.summarize(&record, budget).await?);
        }
        Ok(summaries)
    }
}

#[async_trait]
impl<C: AppClient> RouteBackend for AppProvider<C> {
    async fn attached_routes(
        &self,
        app: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeSet<String>> {
        let guid = self.require(app, budget).await?.guid;
        let routes = await_completion("ListRoutes", budget, |done| {
            self.client.list_routes(&guid, done)
        })
        .await?;
        Ok(routes.into_iter().collect())
    }

    async fn map_route(
        &self,
        app: &str,
        route: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        let guid = self.require(app, budget).await?.guid;
        await_completion("MapRoute", budget, |done| {
            self.client.map_route(&guid, route, done)
        })
        .await
    }

    async fn unmap_route(
        &self,
        app: &str,
        route: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        let guid = self.require(app, budget).await?.guid;
        await_completion("UnmapRoute", budget, |done| {
            self.client.unmap_route(&guid, route, done)
        })
        .await
    }
}

#[async_trait]
impl<C: AppClient> AutoscalerBackend for AppProvider<C> {
    async fn current_policy(
        &self,
        app: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<AutoscalerPolicy>> {
        let guid = self.require(app, budget).await?.guid;
        await_completion("GetAutoscaler", budget, |done| {
            self.client.get_autoscaler(&guid, done)
        })
        .await
    }

    async fn attach_policy(
        &self,
        app: &str,
        policy: &AutoscalerPolicy,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        let guid = self.require(app, budget).await?.guid;
        await_completion("AttachAutoscaler", budget, |done| {
            self.client.attach_autoscaler(&guid, policy, done)
        })
        .await
    }

    async fn detach_policy(&self, app: &str, budget: &TimeoutBudget) -> ProviderResult<()> {
        let guid = self.require(app, budget).await?.guid;
        await_completion("DetachAutoscaler", budget, |done| {
            self.client.detach_autoscaler(&guid, done)
        })
        .await
    }

    async fn set_enabled(
        &self,
        app: &str,
        enabled: bool,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        let guid = self.require(app, budget).await?.guid;
        await_completion("ChangeAutoscalerState", budget, |done| {
            self.client.set_autoscaler_enabled(&guid, enabled, done)
        })
        .await
    }
}
