//! In-memory application platform for tests.
//!
//! Completions are resolved synchronously, before the client call returns,
//! except for operations marked [`MemoryAppClient::silent`], whose
//! completions are parked and never resolved.
//!
//! Lifecycle: a push or update leaves the package `PENDING` for the next
//! read of the application; later reads see `STAGED` (or `FAILED`).
//! Instances of a staged, started app report `STARTING` for one instance
//! read after any push, update or scale, then `RUNNING`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use converge_core::{AppInstance, AutoscalerPolicy, Completion, InstanceState, TemplateSource};

use crate::client::{AppClient, AppLogLine, AppRecord, AppState, PackageState, PushRequest};

#[derive(Default)]
struct State {
    apps: Vec<AppRecord>,
    staging: BTreeSet<String>,
    warming: BTreeSet<String>,
    staging_failure: Option<String>,
    crashing: BTreeSet<String>,
    logs: HashMap<String, Vec<AppLogLine>>,
    routes: HashMap<String, BTreeSet<String>>,
    autoscalers: HashMap<String, AutoscalerPolicy>,
    failures: HashMap<String, String>,
    silent: BTreeSet<String>,
    parked: Vec<Box<dyn Any + Send>>,
    calls: Vec<String>,
    clock: DateTime<Utc>,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        self.clock = (self.clock + ChronoDuration::nanoseconds(1)).max(Utc::now());
        self.clock
    }

    fn log(&mut self, guid: &str, source: &str, message: impl Into<String>) {
        let timestamp = self.now();
        self.logs
            .entry(guid.to_string())
            .or_default()
            .push(AppLogLine {
                timestamp,
                source: source.to_string(),
                message: message.into(),
            });
    }

    fn position(&self, name_or_guid: &str) -> Option<usize> {
        self.apps
            .iter()
            .position(|a| a.guid == name_or_guid || a.name == name_or_guid)
    }

    fn app_mut(&mut self, guid: &str) -> Result<&mut AppRecord, String> {
        self.apps
            .iter_mut()
            .find(|a| a.guid == guid)
            .ok_or_else(|| format!("App {guid} not found"))
    }

    fn restage(&mut self, guid: &str) {
        self.staging.insert(guid.to_string());
        self.warming.insert(guid.to_string());
        self.log(guid, "STG", "Staging app");
    }

    /// Finish staging once the pending package has been observed.
    fn advance_staging(&mut self, index: usize) {
        let guid = self.apps[index].guid.clone();
        if !self.staging.remove(&guid) {
            return;
        }
        match self.staging_failure.clone() {
            Some(reason) => {
                let app = &mut self.apps[index];
                app.package_state = PackageState::Failed;
                app.staging_error = Some(reason.clone());
                self.log(&guid, "STG", format!("Staging failed: {reason}"));
            }
            None => {
                self.apps[index].package_state = PackageState::Staged;
                self.log(&guid, "STG", "Staging complete");
            }
        }
    }

    fn instances(&mut self, guid: &str) -> Result<Vec<AppInstance>, String> {
        let app = self
            .apps
            .iter()
            .find(|a| a.guid == guid)
            .cloned()
            .ok_or_else(|| format!("App {guid} not found"))?;
        if app.package_state != PackageState::Staged || app.state == AppState::Stopped {
            return Ok(Vec::new());
        }

        let warming = self.warming.remove(guid);
        let crashing = self.crashing.contains(&app.name);
        let instances = (0..app.instances)
            .map(|index| {
                let state = if crashing && index == 0 {
                    InstanceState::Crashed
                } else if warming {
                    InstanceState::Starting
                } else {
                    InstanceState::Running
                };
                AppInstance::new(index, state)
            })
            .collect();

        if warming && app.instances > 0 {
            self.log(guid, "CELL", format!("Starting {} instances", app.instances));
        }
        Ok(instances)
    }
}

pub struct MemoryAppClient {
    state: Mutex<State>,
}

impl Default for MemoryAppClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAppClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a staged, started application with `instances` running.
    pub fn with_app(self, name: &str, instances: u32) -> Self {
        {
            let mut state = self.lock();
            let updated_at = state.now();
            state.apps.push(AppRecord {
                guid: Uuid::new_v4().to_string(),
                name: name.to_string(),
                state: AppState::Started,
                package_state: PackageState::Staged,
                staging_error: None,
                instances,
                manifest: Some(format!("applications: [{{name: {name}}}]")),
                env: BTreeMap::new(),
                labels: BTreeMap::new(),
                updated_at,
            });
        }
        self
    }

    pub fn with_routes(self, name: &str, routes: &[&str]) -> Self {
        {
            let mut state = self.lock();
            if let Some(index) = state.position(name) {
                let guid = state.apps[index].guid.clone();
                state
                    .routes
                    .entry(guid)
                    .or_default()
                    .extend(routes.iter().map(|r| r.to_string()));
            }
        }
        self
    }

    pub fn with_autoscaler(self, name: &str, policy: AutoscalerPolicy) -> Self {
        {
            let mut state = self.lock();
            if let Some(index) = state.position(name) {
                let guid = state.apps[index].guid.clone();
                state.autoscalers.insert(guid, policy);
            }
        }
        self
    }

    /// Every staging from now on fails with `reason`.
    pub fn with_staging_failure(self, reason: &str) -> Self {
        self.lock().staging_failure = Some(reason.to_string());
        self
    }

    /// Instance 0 of the named application keeps crashing.
    pub fn with_crashing(self, name: &str) -> Self {
        self.lock().crashing.insert(name.to_string());
        self
    }

    /// Resolve every call of `operation` with `message` on the error side.
    pub fn failing(self, operation: &str, message: &str) -> Self {
        self.lock()
            .failures
            .insert(operation.to_string(), message.to_string());
        self
    }

    /// Never resolve calls of `operation`.
    pub fn silent(self, operation: &str) -> Self {
        self.lock().silent.insert(operation.to_string());
        self
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn app(&self, name: &str) -> Option<AppRecord> {
        let state = self.lock();
        state.position(name).map(|i| state.apps[i].clone())
    }

    pub fn app_names(&self) -> Vec<String> {
        self.lock().apps.iter().map(|a| a.name.clone()).collect()
    }

    pub fn routes(&self, name: &str) -> BTreeSet<String> {
        let state = self.lock();
        state
            .position(name)
            .and_then(|i| state.routes.get(&state.apps[i].guid).cloned())
            .unwrap_or_default()
    }

    pub fn autoscaler(&self, name: &str) -> Option<AutoscalerPolicy> {
        let state = self.lock();
        state
            .position(name)
            .and_then(|i| state.autoscalers.get(&state.apps[i].guid).cloned())
    }

    fn answer<T, F>(&self, operation: &str, done: Completion<T>, handle: F)
    where
        T: Send + 'static,
        F: FnOnce(&mut State) -> Result<T, String>,
    {
        let result = {
            let mut state = self.lock();
            state.calls.push(operation.to_string());
            if state.silent.contains(operation) {
                state.parked.push(Box::new(done));
                return;
            }
            match state.failures.get(operation).cloned() {
                Some(message) => Err(message),
                None => handle(&mut state),
            }
        };
        done.complete(result);
    }
}

fn manifest_text(manifest: &TemplateSource) -> String {
    match manifest {
        TemplateSource::Body(body) => body.clone(),
        TemplateSource::Url(url) => url.clone(),
    }
}

impl AppClient for MemoryAppClient {
    fn get_application(&self, name_or_guid: &str, done: Completion<Option<AppRecord>>) {
        self.answer("GetApplication", done, |state| {
            let Some(index) = state.position(name_or_guid) else {
                return Ok(None);
            };
            let record = state.apps[index].clone();
            state.advance_staging(index);
            Ok(Some(record))
        });
    }

    fn list_applications(&self, done: Completion<Vec<AppRecord>>) {
        self.answer("ListApplications", done, |state| Ok(state.apps.clone()));
    }

    fn push_application(&self, request: &PushRequest, done: Completion<AppRecord>) {
        self.answer("PushApplication", done, |state| {
            if state.position(&request.name).is_some() {
                return Err(format!("The app name {} is already taken", request.name));
            }
            let updated_at = state.now();
            let record = AppRecord {
                guid: Uuid::new_v4().to_string(),
                name: request.name.clone(),
                state: AppState::Started,
                package_state: PackageState::Pending,
                staging_error: None,
                instances: request.instances,
                manifest: Some(manifest_text(&request.manifest)),
                env: request.env.clone(),
                labels: request.labels.clone(),
                updated_at,
            };
            state.apps.push(record.clone());
            state.log(&record.guid, "API", format!("Created app {}", record.name));
            state.restage(&record.guid);
            Ok(record)
        });
    }

    fn update_application(&self, guid: &str, request: &PushRequest, done: Completion<AppRecord>) {
        self.answer("UpdateApplication", done, |state| {
            let updated_at = state.now();
            let app = state.app_mut(guid)?;
            app.package_state = PackageState::Pending;
            app.staging_error = None;
            app.manifest = Some(manifest_text(&request.manifest));
            app.env = request.env.clone();
            app.labels = request.labels.clone();
            app.updated_at = updated_at;
            let record = app.clone();
            state.log(guid, "API", format!("Updated app {}", record.name));
            state.restage(guid);
            Ok(record)
        });
    }

    fn delete_application(&self, guid: &str, done: Completion<()>) {
        self.answer("DeleteApplication", done, |state| {
            let index = state
                .apps
                .iter()
                .position(|a| a.guid == guid)
                .ok_or_else(|| format!("App {guid} not found"))?;
            state.apps.remove(index);
            state.routes.remove(guid);
            state.autoscalers.remove(guid);
            Ok(())
        });
    }

    fn scale_application(&self, guid: &str, instances: u32, done: Completion<()>) {
        self.answer("ScaleApplication", done, |state| {
            state.app_mut(guid)?.instances = instances;
            state.warming.insert(guid.to_string());
            state.log(guid, "API", format!("Scaled app to {instances} instances"));
            Ok(())
        });
    }

    fn get_instances(&self, guid: &str, done: Completion<Vec<AppInstance>>) {
        self.answer("GetInstances", done, |state| state.instances(guid));
    }

    fn recent_logs(&self, guid: &str, done: Completion<Vec<AppLogLine>>) {
        self.answer("RecentLogs", done, |state| {
            Ok(state.logs.get(guid).cloned().unwrap_or_default())
        });
    }

    fn list_routes(&self, guid: &str, done: Completion<Vec<String>>) {
        self.answer("ListRoutes", done, |state| {
            Ok(state
                .routes
                .get(guid)
                .map(|r| r.iter().cloned().collect())
                .unwrap_or_default())
        });
    }

    fn map_route(&self, guid: &str, route: &str, done: Completion<()>) {
        // Route calls answer through split callbacks, the way SDK route
        // clients report.
        let (on_success, on_error) = done.split();
        let mut state = self.lock();
        state.calls.push("MapRoute".to_string());
        if let Some(message) = state.failures.get("MapRoute").cloned() {
            on_error.call(message);
            return;
        }
        state
            .routes
            .entry(guid.to_string())
            .or_default()
            .insert(route.to_string());
        on_success.call(());
    }

    fn unmap_route(&self, guid: &str, route: &str, done: Completion<()>) {
        let (on_success, on_error) = done.split();
        let mut state = self.lock();
        state.calls.push("UnmapRoute".to_string());
        if let Some(message) = state.failures.get("UnmapRoute").cloned() {
            on_error.call(message);
            return;
        }
        if let Some(routes) = state.routes.get_mut(guid) {
            routes.remove(route);
        }
        on_success.call(());
    }

    fn get_autoscaler(&self, guid: &str, done: Completion<Option<AutoscalerPolicy>>) {
        self.answer("GetAutoscaler", done, |state| {
            Ok(state.autoscalers.get(guid).cloned())
        });
    }

    fn attach_autoscaler(&self, guid: &str, policy: &AutoscalerPolicy, done: Completion<()>) {
        self.answer("AttachAutoscaler", done, |state| {
            state.autoscalers.insert(guid.to_string(), policy.clone());
            Ok(())
        });
    }

    fn detach_autoscaler(&self, guid: &str, done: Completion<()>) {
        self.answer("DetachAutoscaler", done, |state| {
            state.autoscalers.remove(guid);
            Ok(())
        });
    }

    fn set_autoscaler_enabled(&self, guid: &str, enabled: bool, done: Completion<()>) {
        self.answer("ChangeAutoscalerState", done, |state| {
            state
                .autoscalers
                .get_mut(guid)
                .map(|policy| policy.enabled = enabled)
                .ok_or_else(|| format!("No autoscaler bound to app {guid}"))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{await_completion, TimeoutBudget};
    use std::time::Duration;

    fn push(name: &str) -> PushRequest {
        PushRequest {
            name: name.to_string(),
            manifest: TemplateSource::Body("applications: []".to_string()),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            instances: 1,
        }
    }

    async fn package_state(client: &MemoryAppClient, guid: &str) -> PackageState {
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        await_completion("GetApplication", &budget, |done| {
            client.get_application(guid, done)
        })
        .await
        .expect("read")
        .expect("exists")
        .package_state
    }

    async fn first_instance(client: &MemoryAppClient, guid: &str) -> InstanceState {
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        let instances = await_completion("GetInstances", &budget, |done| {
            client.get_instances(guid, done)
        })
        .await
        .expect("instances");
        instances[0].state
    }

    #[tokio::test]
    async fn pushed_app_stages_then_warms_up() {
        let client = MemoryAppClient::new();
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        let record = await_completion("PushApplication", &budget, |done| {
            client.push_application(&push("shop__0"), done)
        })
        .await
        .expect("pushed");
        assert_eq!(record.package_state, PackageState::Pending);

        assert_eq!(package_state(&client, &record.guid).await, PackageState::Pending);
        assert_eq!(package_state(&client, &record.guid).await, PackageState::Staged);

        assert_eq!(first_instance(&client, &record.guid).await, InstanceState::Starting);
        assert_eq!(first_instance(&client, &record.guid).await, InstanceState::Running);
    }

    #[tokio::test]
    async fn duplicate_push_is_rejected() {
        let client = MemoryAppClient::new().with_app("shop__0", 1);
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        let err = await_completion("PushApplication", &budget, |done| {
            client.push_application(&push("shop__0"), done)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("already taken"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_operation_never_resolves() {
        let client = MemoryAppClient::new().silent("ListApplications");
        let budget = TimeoutBudget::start(Duration::from_secs(3));
        let err = await_completion("ListApplications", &budget, |done| {
            client.list_applications(done)
        })
        .await
        .unwrap_err();
        assert!(err.is_deadline());
        assert_eq!(client.calls(), vec!["ListApplications".to_string()]);
    }

    #[tokio::test]
    async fn route_failure_arrives_on_error_callback() {
        let client = MemoryAppClient::new()
            .with_app("shop__0", 1)
            .failing("MapRoute", "Route shop.example.com is reserved");
        let guid = client.app("shop__0").expect("seeded").guid;
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        let err = await_completion("MapRoute", &budget, |done| {
            client.map_route(&guid, "shop.example.com", done)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("reserved"));
        assert!(client.routes("shop__0").is_empty());
    }
}
