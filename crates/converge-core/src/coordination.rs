//! Idempotent route and autoscaler coordination.
//!
//! Both coordinators read the attached state first, diff it against the
//! desired state and issue only the calls that close the gap. Re-running
//! with nothing to change issues no mutating call at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::budget::TimeoutBudget;
use crate::domain::ProviderResult;

/// Route operations of an app-style platform.
#[async_trait]
pub trait RouteBackend: Send + Sync {
    async fn attached_routes(
        &self,
        app: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeSet<String>>;

    async fn map_route(&self, app: &str, route: &str, budget: &TimeoutBudget) -> ProviderResult<()>;

    async fn unmap_route(
        &self,
        app: &str,
        route: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()>;
}

#[async_trait]
impl<B: RouteBackend + ?Sized> RouteBackend for Arc<B> {
    async fn attached_routes(
        &self,
        app: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<BTreeSet<String>> {
        (**self).attached_routes(app, budget).await
    }

    async fn map_route(
        &self,
        app: &str,
        route: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        (**self).map_route(app, route, budget).await
    }

    async fn unmap_route(
        &self,
        app: &str,
        route: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        (**self).unmap_route(app, route, budget).await
    }
}

/// Routes changed by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteChange {
    pub mapped: Vec<String>,
    pub unmapped: Vec<String>,
}

impl RouteChange {
    pub fn is_noop(&self) -> bool {
        self.mapped.is_empty() && self.unmapped.is_empty()
    }
}

/// Result of moving routes from one release to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSwap {
    pub attached_to_new: Vec<String>,
    pub detached_from_old: Vec<String>,
}

pub struct RouteCoordinator<B> {
    backend: B,
}

impl<B: RouteBackend> RouteCoordinator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Make `app`'s attached routes exactly `desired`.
    pub async fn reconcile(
        &self,
        app: &str,
        desired: &BTreeSet<String>,
        budget: &TimeoutBudget,
    ) -> ProviderResult<RouteChange> {
        let current = self.backend.attached_routes(app, budget).await?;
        let mut change = RouteChange::default();

        for route in desired.difference(&current) {
            self.backend.map_route(app, route, budget).await?;
            change.mapped.push(route.clone());
        }
        for route in current.difference(desired) {
            self.backend.unmap_route(app, route, budget).await?;
            change.unmapped.push(route.clone());
        }

        info!(
            app = %app,
            mapped = change.mapped.len(),
            unmapped = change.unmapped.len(),
            "routes reconciled"
        );
        Ok(change)
    }

    /// Blue/green swap: attach `routes` to `new_app`, then detach them from
    /// `old_app`. Routes already in place are skipped on both sides.
    pub async fn swap(
        &self,
        old_app: &str,
        new_app: &str,
        routes: &BTreeSet<String>,
        budget: &TimeoutBudget,
    ) -> ProviderResult<RouteSwap> {
        let mut swap = RouteSwap::default();

        let on_new = self.backend.attached_routes(new_app, budget).await?;
        for route in routes.difference(&on_new) {
            self.backend.map_route(new_app, route, budget).await?;
            swap.attached_to_new.push(route.clone());
        }

        let on_old = self.backend.attached_routes(old_app, budget).await?;
        for route in routes.intersection(&on_old) {
            self.backend.unmap_route(old_app, route, budget).await?;
            swap.detached_from_old.push(route.clone());
        }

        info!(
            old_app = %old_app,
            new_app = %new_app,
            attached = swap.attached_to_new.len(),
            detached = swap.detached_from_old.len(),
            "routes swapped"
        );
        Ok(swap)
    }
}

/// Autoscaling policy as attached to an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerPolicy {
    /// Opaque policy document.
    pub document: String,
    pub enabled: bool,
}

impl AutoscalerPolicy {
    pub fn new(document: impl Into<String>, enabled: bool) -> Self {
        Self {
            document: document.into(),
            enabled,
        }
    }
}

/// Autoscaler operations of an app-style platform.
#[async_trait]
pub trait AutoscalerBackend: Send + Sync {
    async fn current_policy(
        &self,
        app: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<AutoscalerPolicy>>;

    async fn attach_policy(
        &self,
        app: &str,
        policy: &AutoscalerPolicy,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()>;

    async fn detach_policy(&self, app: &str, budget: &TimeoutBudget) -> ProviderResult<()>;

    async fn set_enabled(
        &self,
        app: &str,
        enabled: bool,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()>;
}

#[async_trait]
impl<B: AutoscalerBackend + ?Sized> AutoscalerBackend for Arc<B> {
    async fn current_policy(
        &self,
        app: &str,
        budget: &TimeoutBudget,
    ) -> ProviderResult<Option<AutoscalerPolicy>> {
        (**self).current_policy(app, budget).await
    }

    async fn attach_policy(
        &self,
        app: &str,
        policy: &AutoscalerPolicy,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        (**self).attach_policy(app, policy, budget).await
    }

    async fn detach_policy(&self, app: &str, budget: &TimeoutBudget) -> ProviderResult<()> {
        (**self).detach_policy(app, budget).await
    }

    async fn set_enabled(
        &self,
        app: &str,
        enabled: bool,
        budget: &TimeoutBudget,
    ) -> ProviderResult<()> {
        (**self).set_enabled(app, enabled, budget).await
    }
}

/// What the autoscaler coordinator did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoscalerAction {
    Unchanged,
    Attached,
    Detached,
    Reattached,
    Enabled,
    Disabled,
}

pub struct AutoscalerCoordinator<B> {
    backend: B,
}

impl<B: AutoscalerBackend> AutoscalerCoordinator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Bring `app`'s policy to `desired`; `None` means no policy at all.
    pub async fn reconcile(
        &self,
        app: &str,
        desired: Option<&AutoscalerPolicy>,
        budget: &TimeoutBudget,
    ) -> ProviderResult<AutoscalerAction> {
        let current = self.backend.current_policy(app, budget).await?;

        let action = match (current.as_ref(), desired) {
            (None, None) => AutoscalerAction::Unchanged,
            (None, Some(wanted)) => {
                self.backend.attach_policy(app, wanted, budget).await?;
                AutoscalerAction::Attached
            }
            (Some(_), None) => {
                self.backend.detach_policy(app, budget).await?;
                AutoscalerAction::Detached
            }
            (Some(have), Some(wanted)) if have.document != wanted.document => {
                self.backend.detach_policy(app, budget).await?;
                self.backend.attach_policy(app, wanted, budget).await?;
                AutoscalerAction::Reattached
            }
            (Some(have), Some(wanted)) if have.enabled != wanted.enabled => {
                self.backend.set_enabled(app, wanted.enabled, budget).await?;
                if wanted.enabled {
                    AutoscalerAction::Enabled
                } else {
                    AutoscalerAction::Disabled
                }
            }
            (Some(_), Some(_)) => AutoscalerAction::Unchanged,
        };

        info!(app = %app, action = ?action, "autoscaler reconciled");
        Ok(action)
    }
}
