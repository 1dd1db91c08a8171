//! [`ProviderAdapter`] over a stack service.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

use converge_core::{
    DeploymentSpec, ExistingTargetInfo, ProviderAdapter, ProviderError, ProviderResult,
    ReconciliationStatus, StatusSnapshot, TargetDescriptor, TargetEvent, TargetSummary,
    TimeoutBudget, UpdateSubmission,
};

use crate::client::{StackApiError, StackClient, StackConnection, StackDescription, StackRequest};
use crate::status::{classify, is_no_updates_message};

/// Stack-style provider adapter.
pub struct StackProvider<C> {
    client: C,
    connection: StackConnection,
}

impl<C: StackClient> StackProvider<C> {
    pub fn new(client: C, connection: StackConnection) -> Self {
        Self { client, connection }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn connection(&self) -> &StackConnection {
        &self.connection
    }

    fn request(&self, spec: &DeploymentSpec) -> StackRequest {
        StackRequest {
            stack_name: spec.target_name.clone(),
            template: spec.template.clone(),
            parameters: spec.parameters.clone(),
            tags: spec.tags.clone(),
            capabilities: spec.capabilities.clone(),
            role_arn: spec
                .credential_role
                .clone()
                .or_else(|| self.connection.role.clone()),
        }
    }

    async fn describe(
        &self,
        stack: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<StackDescription>> {
        budget
            .bound("DescribeStacks", async {
                self.client
                    .describe_stack(stack)
                    .await
                    .map_err(|e| to_provider_error("DescribeStacks", e))
            })
            .await
    }
}

/// Normalize a stack service error.
pub fn to_provider_error(operation: &str, err: StackApiError) -> ProviderError {
    match err {
        StackApiError::NotFound { stack } => ProviderError::TargetNotFound { id: stack },
        StackApiError::Validation { message } => ProviderError::Rejected {
            operation: operation.to_string(),
            message,
        },
        other => ProviderError::backend(operation, other.to_string()),
    }
}

fn summary(description: &StackDescription) -> TargetSummary {
    TargetSummary {
        id: description.stack_id.clone(),
        name: description.stack_name.clone(),
        status: classify(&description.stack_status),
        status_code: description.stack_status.clone(),
        status_reason: description.stack_status_reason.clone(),
    }
}

#[async_trait]
impl<C: StackClient> ProviderAdapter for StackProvider<C> {
    fn kind(&self) -> &'static str {
        "stack"
    }

    async fn probe(
        &self,
        name: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<TargetDescriptor>> {
        let found = match self.describe(name, budget).await {
            Ok(found) => found,
            Err(ProviderError::TargetNotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        Ok(found
            .filter(|d| classify(&d.stack_status) != ReconciliationStatus::DeleteComplete)
            .map(|d| {
                TargetDescriptor::existing(
                    d.stack_id,
                    d.stack_name,
                    classify(&d.stack_status),
                    d.stack_status,
                )
            }))
    }

    async fn submit_create(
        &self,
        spec: &DeploymentSpec,
        budget: &TimeoutBudget,
    ) -> ProviderResult<String> {
        let request = self.request(spec);
        let stack_id = budget
            .bound("CreateStack", async {
                self.client
                    .create_stack(&request)
                    .await
                    .map_err(|e| to_provider_error("CreateStack", e))
            })
            .await?;
        info!(
            stack = %spec.target_name,
            stack_id = %stack_id,
            region = %self.connection.region,
            "create submitted"
        );
        Ok(stack_id)
    }

    async fn submit_update(
        &self,
        spec: &DeploymentSpec,
        target: &TargetDescriptor,
        budget: &TimeoutBudget,
    ) -> ProviderResult<UpdateSubmission> {
        let mut request = self.request(spec);
        request.stack_name = target.id.clone();
        let result = budget
            .bound("UpdateStack", async {
                match self.client.update_stack(&request).await {
                    Ok(id) => Ok(Some(id)),
                    Err(StackApiError::Validation { message })
                        if is_no_updates_message(&message) =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(to_provider_error("UpdateStack", err)),
                }
            })
            .await?;
        match result {
            Some(stack_id) => {
                info!(stack = %spec.target_name, stack_id = %stack_id, "update submitted");
                Ok(UpdateSubmission::submitted(stack_id))
            }
            None => {
                info!(stack = %spec.target_name, "nothing to update");
                Ok(UpdateSubmission::no_change(target.id.clone()))
            }
        }
    }

    async fn submit_delete(&self, target_id: &str, budget: &TimeoutBudget) -> ProviderResult<()> {
        budget
            .bound("DeleteStack", async {
                self.client
                    .delete_stack(target_id)
                    .await
                    .map_err(|e| to_provider_error("DeleteStack", e))
            })
            .await
    }

    async fn fetch_status(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<StatusSnapshot> {
        let description = self
            .describe(target_id, budget)
            .await?
            .ok_or_else(|| ProviderError::TargetNotFound {
                id: target_id.to_string(),
            })?;

        let mut records = budget
            .bound("DescribeStackEvents", async {
                self.client
                    .describe_stack_events(target_id)
                    .await
                    .map_err(|e| to_provider_error("DescribeStackEvents", e))
            })
            .await?;
        records.reverse();
        let events = records
            .into_iter()
            .map(|r| {
                TargetEvent::new(
                    r.timestamp,
                    r.logical_resource_id,
                    r.resource_status,
                    r.resource_status_reason,
                )
            })
            .collect();

        let status = classify(&description.stack_status);
        debug!(
            stack_id = %target_id,
            raw = %description.stack_status,
            status = %status,
            "stack described"
        );
        let mut snapshot = StatusSnapshot::new(target_id, status, description.stack_status)
            .with_events(events);
        snapshot.status_reason = description.stack_status_reason;
        Ok(snapshot)
    }

    async fn fetch_outputs(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeMap<String, String>> {
        let description = self
            .describe(target_id, budget)
            .await?
            .ok_or_else(|| ProviderError::TargetNotFound {
                id: target_id.to_string(),
            })?;
        Ok(description
            .outputs
            .into_iter()
            .map(|o| (o.key, o.value))
            .collect())
    }

    async fn fetch_template(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<ExistingTargetInfo>> {
        let Some(description) = self.describe(target_id, budget).await? else {
            return Ok(None);
        };
        let body = budget
            .bound("GetTemplate", async {
                self.client
                    .get_template(target_id)
                    .await
                    .map_err(|e| to_provider_error("GetTemplate", e))
            })
            .await?;
        Ok(Some(ExistingTargetInfo {
            existed: true,
            previous_template: body,
            previous_parameters: description.parameters,
        }))
    }

    async fn list_targets(&self, budget: &TimeoutBudget) -> ProviderResult<Vec<TargetSummary>> {
        let stacks = budget
            .bound("ListStacks", async {
                self.client
                    .list_stacks()
                    .await
                    .map_err(|e| to_provider_error("ListStacks", e))
            })
            .await?;
        Ok(stacks
            .iter()
            .filter(|d| classify(&d.stack_status) != ReconciliationStatus::DeleteComplete)
            .map(summary)
            .collect())
    }
}
