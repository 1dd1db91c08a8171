//! Stack service API surface used by [`crate::StackProvider`].
//!
//! The trait mirrors the handful of stack service calls the provider needs.
//! A real deployment implements it over the service SDK; tests use
//! [`crate::fakes::MemoryStackClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use converge_core::{Parameter, TemplateSource};

/// Errors raised by a [`StackClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackApiError {
    /// Request rejected by the service's validation, including the
    /// "No updates are to be performed" answer to a no-op update.
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("stack {stack} does not exist")]
    NotFound { stack: String },

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

pub type StackApiResult<T> = std::result::Result<T, StackApiError>;

/// Resolved connection parameters for one stack service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConnection {
    pub region: String,
    pub endpoint: Option<String>,
    /// Role assumed by the service for every stack operation unless a spec
    /// names its own.
    pub role: Option<String>,
}

impl StackConnection {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            role: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// One stack as described by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    pub stack_id: String,
    pub stack_name: String,
    pub stack_status: String,
    pub stack_status_reason: Option<String>,
    pub parameters: Vec<Parameter>,
    pub outputs: Vec<StackOutput>,
    pub creation_time: DateTime<Utc>,
}

/// One stack event. The service lists events newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEventRecord {
    pub timestamp: DateTime<Utc>,
    pub logical_resource_id: String,
    pub resource_status: String,
    pub resource_status_reason: Option<String>,
}

/// Body shared by create and update requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<Parameter>,
    pub tags: BTreeMap<String, String>,
    pub capabilities: BTreeSet<String>,
    pub role_arn: Option<String>,
}

#[async_trait]
pub trait StackClient: Send + Sync {
    /// Describe a stack by name or id. `None` when the service has no such
    /// live stack.
    async fn describe_stack(&self, stack: &str) -> StackApiResult<Option<StackDescription>>;

    /// Returns the new stack id.
    async fn create_stack(&self, request: &StackRequest) -> StackApiResult<String>;

    /// Returns the stack id. A no-op update fails with a validation error.
    async fn update_stack(&self, request: &StackRequest) -> StackApiResult<String>;

    async fn delete_stack(&self, stack_id: &str) -> StackApiResult<()>;

    /// Events of the stack, newest first.
    async fn describe_stack_events(&self, stack_id: &str) -> StackApiResult<Vec<StackEventRecord>>;

    /// Template body currently applied to the stack.
    async fn get_template(&self, stack_id: &str) -> StackApiResult<Option<String>>;

    /// Every stack, including deleted ones.
    async fn list_stacks(&self) -> StackApiResult<Vec<StackDescription>>;
}
