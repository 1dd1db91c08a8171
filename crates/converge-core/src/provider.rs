//! Provider adapter abstraction over a remote control plane.
//!
//! The engine is written once against [`ProviderAdapter`]; each backend
//! (declarative stacks, platform applications) supplies an implementation.
//! In-memory implementations for tests live in the `fakes` module.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::budget::TimeoutBudget;
use crate::domain::{
    DeploymentSpec, ExistingTargetInfo, ProviderResult, StatusSnapshot, TargetDescriptor,
    TargetSummary, UpdateSubmission,
};

/// Capability set every backend must provide.
///
/// Every call receives the caller's budget; implementations bound their
/// remote calls by what is left of it. Failures are reported as
/// [`ProviderError`](crate::domain::ProviderError) only.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short backend name used in logs ("stack", "app").
    fn kind(&self) -> &'static str;

    /// Look the target up by name. `None` when it does not exist.
    async fn probe(
        &self,
        name: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<TargetDescriptor>>;

    /// Submit a create. Returns the id later calls address the target by.
    async fn submit_create(
        &self,
        spec: &DeploymentSpec,
        budget: &TimeoutBudget,
    ) -> ProviderResult<String>;

    /// Submit an update of an existing target.
    async fn submit_update(
        &self,
        spec: &DeploymentSpec,
        target: &TargetDescriptor,
        budget: &TimeoutBudget,
    ) -> ProviderResult<UpdateSubmission>;

    /// Submit a delete.
    async fn submit_delete(&self, target_id: &str, budget: &TimeoutBudget) -> ProviderResult<()>;

    /// Read the target's current status and its events.
    ///
    /// Returns `TargetNotFound` when the provider has no record of the id.
    async fn fetch_status(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<StatusSnapshot>;

    /// Read the target's outputs (stack outputs, app environment).
    async fn fetch_outputs(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeMap<String, String>>;

    /// Read the target's current definition, if the backend can.
    async fn fetch_template(
        &self,
        _target_id: &str,
        _budget: &TimeoutBudget,
    ) -> ProviderResult<Option<ExistingTargetInfo>> {
        Ok(None)
    }

    /// List every target visible to the adapter's credentials.
    async fn list_targets(&self, budget: &TimeoutBudget) -> ProviderResult<Vec<TargetSummary>>;
}

#[async_trait]
impl<P> ProviderAdapter for Arc<P>
where
    P: ProviderAdapter + ?Sized,
{
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    async fn probe(
        &self,
        name: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<TargetDescriptor>> {
        (**self).probe(name, budget).await
    }

    async fn submit_create(
        &self,
        spec: &DeploymentSpec,
        budget: &TimeoutBudget,
    ) -> ProviderResult<String> {
        (**self).submit_create(spec, budget).await
    }

    async fn submit_update(
        &self,
        spec: &DeploymentSpec,
        target: &TargetDescriptor,
        budget: &TimeoutBudget,
    ) -> ProviderResult<UpdateSubmission> {
        (**self).submit_update(spec, target, budget).await
    }

    async fn submit_delete(&self, target_id: &str, budget: &TimeoutBudget) -> ProviderResult<()> {
        (**self).submit_delete(target_id, budget).await
    }

    async fn fetch_status(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<StatusSnapshot> {
        (**self).fetch_status(target_id, budget).await
    }

    async fn fetch_outputs(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeMap<String, String>> {
        (**self).fetch_outputs(target_id, budget).await
    }

    async fn fetch_template(
        &self,
        target_id: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<ExistingTargetInfo>> {
        (**self).fetch_template(target_id, budget).await
    }

    async fn list_targets(&self, budget: &TimeoutBudget) -> ProviderResult<Vec<TargetSummary>> {
        (**self).list_targets(budget).await
    }
}
