//! In-memory stack service (testing only)
//!
//! `MemoryStackClient` keeps stacks in a `Vec` and walks each one through a
//! scripted status progression, one step per describe call, recording a
//! stack event for every step.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use converge_core::{Parameter, TemplateSource};

use crate::client::{
    StackApiError, StackApiResult, StackClient, StackDescription, StackEventRecord, StackOutput,
    StackRequest,
};

type Step = (String, Option<String>);

#[derive(Debug, Clone)]
struct StackRecord {
    id: String,
    name: String,
    template: String,
    parameters: Vec<Parameter>,
    status: String,
    reason: Option<String>,
    pending: VecDeque<Step>,
    events: Vec<StackEventRecord>,
    outputs: Vec<StackOutput>,
    created: DateTime<Utc>,
}

impl StackRecord {
    fn live(&self) -> bool {
        self.status != "DELETE_COMPLETE"
    }

    fn describe(&self) -> StackDescription {
        StackDescription {
            stack_id: self.id.clone(),
            stack_name: self.name.clone(),
            stack_status: self.status.clone(),
            stack_status_reason: self.reason.clone(),
            parameters: self.parameters.clone(),
            outputs: self.outputs.clone(),
            creation_time: self.created,
        }
    }
}

#[derive(Debug)]
struct ServiceState {
    stacks: Vec<StackRecord>,
    clock: DateTime<Utc>,
    create_plan: Vec<Step>,
    update_plan: Vec<Step>,
    delete_plan: Vec<Step>,
    outputs: Vec<StackOutput>,
    failures: HashMap<String, StackApiError>,
    calls: Vec<String>,
}

impl ServiceState {
    /// Wall-clock time, strictly increasing across calls.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock = (self.clock + Duration::nanoseconds(1)).max(Utc::now());
        self.clock
    }

    fn find_live(&self, stack: &str) -> Option<usize> {
        self.stacks
            .iter()
            .position(|s| s.live() && (s.id == stack || s.name == stack))
    }

    /// Move a stack to `status` and record the matching event.
    fn transition(&mut self, index: usize, status: &str, reason: Option<String>) {
        let at = self.tick();
        let stack = &mut self.stacks[index];
        stack.status = status.to_string();
        stack.reason = reason.clone();
        stack.events.push(StackEventRecord {
            timestamp: at,
            logical_resource_id: stack.name.clone(),
            resource_status: status.to_string(),
            resource_status_reason: reason,
        });
    }

    fn fail_if_scripted(&self, operation: &str) -> StackApiResult<()> {
        match self.failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn plan(steps: &[(&str, Option<&str>)]) -> Vec<Step> {
    steps
        .iter()
        .map(|(status, reason)| (status.to_string(), reason.map(str::to_string)))
        .collect()
}

fn template_text(template: &TemplateSource) -> String {
    match template {
        TemplateSource::Body(body) => body.clone(),
        TemplateSource::Url(url) => url.clone(),
    }
}

/// In-memory stack service.
#[derive(Debug)]
pub struct MemoryStackClient {
    state: Mutex<ServiceState>,
}

impl Default for MemoryStackClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStackClient {
    /// Creates, updates and deletes all succeed after one in-progress read.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState {
                stacks: Vec::new(),
                clock: Utc::now(),
                create_plan: plan(&[("CREATE_COMPLETE", None)]),
                update_plan: plan(&[
                    ("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS", None),
                    ("UPDATE_COMPLETE", None),
                ]),
                delete_plan: plan(&[("DELETE_COMPLETE", None)]),
                outputs: Vec::new(),
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a live stack in `status`.
    pub fn with_stack(self, name: &str, status: &str, template: &str) -> Self {
        {
            let mut state = self.lock();
            let created = state.tick();
            state.stacks.push(StackRecord {
                id: format!("arn:converge:stack/{name}/{}", Uuid::new_v4()),
                name: name.to_string(),
                template: template.to_string(),
                parameters: Vec::new(),
                status: status.to_string(),
                reason: None,
                pending: VecDeque::new(),
                events: Vec::new(),
                outputs: Vec::new(),
                created,
            });
        }
        self
    }

    /// Statuses a new stack moves through after `CREATE_IN_PROGRESS`.
    pub fn with_create_plan(self, steps: &[(&str, Option<&str>)]) -> Self {
        self.lock().create_plan = plan(steps);
        self
    }

    /// Statuses an updated stack moves through after `UPDATE_IN_PROGRESS`.
    pub fn with_update_plan(self, steps: &[(&str, Option<&str>)]) -> Self {
        self.lock().update_plan = plan(steps);
        self
    }

    /// Statuses a deleted stack moves through after `DELETE_IN_PROGRESS`.
    pub fn with_delete_plan(self, steps: &[(&str, Option<&str>)]) -> Self {
        self.lock().delete_plan = plan(steps);
        self
    }

    /// Outputs attached to every stack created from now on.
    pub fn with_output(self, key: &str, value: &str) -> Self {
        self.lock().outputs.push(StackOutput {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Make every call to `operation` (e.g. "CreateStack") fail with `err`.
    pub fn failing(self, operation: &str, err: StackApiError) -> Self {
        self.lock().failures.insert(operation.to_string(), err);
        self
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Current status of the newest stack named `name`, deleted ones included.
    pub fn stack_status(&self, name: &str) -> Option<String> {
        self.lock()
            .stacks
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.status.clone())
    }

    pub fn stack_count(&self) -> usize {
        self.lock().stacks.len()
    }
}

#[async_trait]
impl StackClient for MemoryStackClient {
    async fn describe_stack(&self, stack: &str) -> StackApiResult<Option<StackDescription>> {
        let mut state = self.lock();
        state.calls.push("DescribeStacks".to_string());
        state.fail_if_scripted("DescribeStacks")?;

        let index = state
            .find_live(stack)
            .or_else(|| state.stacks.iter().rposition(|s| s.id == stack));
        let Some(index) = index else {
            return Ok(None);
        };
        if let Some((status, reason)) = state.stacks[index].pending.pop_front() {
            state.transition(index, &status, reason);
        }
        Ok(Some(state.stacks[index].describe()))
    }

    async fn create_stack(&self, request: &StackRequest) -> StackApiResult<String> {
        let mut state = self.lock();
        state.calls.push("CreateStack".to_string());
        state.fail_if_scripted("CreateStack")?;

        if state.find_live(&request.stack_name).is_some() {
            return Err(StackApiError::Validation {
                message: format!("Stack [{}] already exists", request.stack_name),
            });
        }
        let created = state.tick();
        let record = StackRecord {
            id: format!("arn:converge:stack/{}/{}", request.stack_name, Uuid::new_v4()),
            name: request.stack_name.clone(),
            template: template_text(&request.template),
            parameters: request.parameters.clone(),
            status: String::new(),
            reason: None,
            pending: state.create_plan.iter().cloned().collect(),
            events: Vec::new(),
            outputs: state.outputs.clone(),
            created,
        };
        let id = record.id.clone();
        state.stacks.push(record);
        let index = state.stacks.len() - 1;
        state.transition(index, "CREATE_IN_PROGRESS", Some("User Initiated".to_string()));
        Ok(id)
    }

    async fn update_stack(&self, request: &StackRequest) -> StackApiResult<String> {
        let mut state = self.lock();
        state.calls.push("UpdateStack".to_string());
        state.fail_if_scripted("UpdateStack")?;

        let index = state
            .find_live(&request.stack_name)
            .ok_or_else(|| StackApiError::Validation {
                message: format!("Stack [{}] does not exist", request.stack_name),
            })?;
        let template = template_text(&request.template);
        {
            let stack = &state.stacks[index];
            if stack.template == template && stack.parameters == request.parameters {
                return Err(StackApiError::Validation {
                    message: "No updates are to be performed.".to_string(),
                });
            }
        }
        let update_plan = state.update_plan.clone();
        let stack = &mut state.stacks[index];
        stack.template = template;
        stack.parameters = request.parameters.clone();
        stack.pending = update_plan.into_iter().collect();
        let id = stack.id.clone();
        state.transition(index, "UPDATE_IN_PROGRESS", Some("User Initiated".to_string()));
        Ok(id)
    }

    async fn delete_stack(&self, stack_id: &str) -> StackApiResult<()> {
        let mut state = self.lock();
        state.calls.push("DeleteStack".to_string());
        state.fail_if_scripted("DeleteStack")?;

        // Deleting a stack that is already gone is accepted silently.
        let Some(index) = state.find_live(stack_id) else {
            return Ok(());
        };
        let delete_plan = state.delete_plan.clone();
        state.stacks[index].pending = delete_plan.into_iter().collect();
        state.transition(index, "DELETE_IN_PROGRESS", Some("User Initiated".to_string()));
        Ok(())
    }

    async fn describe_stack_events(&self, stack_id: &str) -> StackApiResult<Vec<StackEventRecord>> {
        let mut state = self.lock();
        state.calls.push("DescribeStackEvents".to_string());
        state.fail_if_scripted("DescribeStackEvents")?;

        let stack = state
            .stacks
            .iter()
            .rev()
            .find(|s| s.id == stack_id || s.name == stack_id)
            .ok_or_else(|| StackApiError::NotFound {
                stack: stack_id.to_string(),
            })?;
        Ok(stack.events.iter().rev().cloned().collect())
    }

    async fn get_template(&self, stack_id: &str) -> StackApiResult<Option<String>> {
        let mut state = self.lock();
        state.calls.push("GetTemplate".to_string());
        state.fail_if_scripted("GetTemplate")?;
        Ok(state
            .find_live(stack_id)
            .map(|index| state.stacks[index].template.clone()))
    }

    async fn list_stacks(&self) -> StackApiResult<Vec<StackDescription>> {
        let mut state = self.lock();
        state.calls.push("ListStacks".to_string());
        state.fail_if_scripted("ListStacks")?;
        Ok(state.stacks.iter().map(StackRecord::describe).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn request(name: &str, body: &str) -> StackRequest {
        StackRequest {
            stack_name: name.to_string(),
            template: TemplateSource::Body(body.to_string()),
            parameters: Vec::new(),
            tags: BTreeMap::new(),
            capabilities: BTreeSet::new(),
            role_arn: None,
        }
    }

    #[tokio::test]
    async fn create_progresses_one_step_per_describe() {
        let client = MemoryStackClient::new();
        let id = client.create_stack(&request("vpc", "{}")).await.unwrap();

        let first = client.describe_stack(&id).await.unwrap().unwrap();
        assert_eq!(first.stack_status, "CREATE_COMPLETE");
        let events = client.describe_stack_events(&id).await.unwrap();
        assert_eq!(events[0].resource_status, "CREATE_COMPLETE");
        assert_eq!(events[1].resource_status, "CREATE_IN_PROGRESS");
    }

    #[tokio::test]
    async fn identical_update_is_rejected_as_no_op() {
        let client = MemoryStackClient::new();
        client.create_stack(&request("vpc", "{}")).await.unwrap();
        let err = client.update_stack(&request("vpc", "{}")).await.unwrap_err();
        assert!(matches!(
            err,
            StackApiError::Validation { message } if message.starts_with("No updates")
        ));
    }

    #[tokio::test]
    async fn deleted_stack_is_gone_by_name_but_visible_by_id() {
        let client = MemoryStackClient::new().with_create_plan(&[]);
        let id = client.create_stack(&request("vpc", "{}")).await.unwrap();
        client.delete_stack(&id).await.unwrap();

        let by_id = client.describe_stack(&id).await.unwrap().unwrap();
        assert_eq!(by_id.stack_status, "DELETE_COMPLETE");
        assert!(client.describe_stack("vpc").await.unwrap().is_none());
    }
}
