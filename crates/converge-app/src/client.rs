//! Callback-style platform API used by [`crate::AppProvider`].
//!
//! Every call hands the client a [`Completion`] and returns immediately; the
//! client resolves it from whatever thread or task its SDK answers on.
//! Errors are the platform's message text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use converge_core::{AppInstance, AutoscalerPolicy, Completion, TemplateSource};

/// Resolved connection parameters for one platform endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConnection {
    pub endpoint: String,
    pub org: String,
    pub space: String,
}

impl AppConnection {
    pub fn new(
        endpoint: impl Into<String>,
        org: impl Into<String>,
        space: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            org: org.into(),
            space: space.into(),
        }
    }
}

/// Requested run state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    Stopped,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AppState::Started => "STARTED",
            AppState::Stopped => "STOPPED",
        })
    }
}

/// Staging state of the application's current package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    Pending,
    Staged,
    Failed,
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageState::Pending => "PENDING",
            PackageState::Staged => "STAGED",
            PackageState::Failed => "FAILED",
        })
    }
}

/// One application as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub guid: String,
    pub name: String,
    pub state: AppState,
    pub package_state: PackageState,
    pub staging_error: Option<String>,
    /// Desired instance count.
    pub instances: u32,
    pub manifest: Option<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// Push or re-push of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub name: String,
    pub manifest: TemplateSource,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub instances: u32,
}

/// One line of the application's recent log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLogLine {
    pub timestamp: DateTime<Utc>,
    /// Emitting component, e.g. `STG` or `APP/PROC/WEB/0`.
    pub source: String,
    pub message: String,
}

pub trait AppClient: Send + Sync {
    /// Look an application up by name or guid.
    fn get_application(&self, name_or_guid: &str, done: Completion<Option<AppRecord>>);

    fn list_applications(&self, done: Completion<Vec<AppRecord>>);

    /// Create the application and start staging it.
    fn push_application(&self, request: &PushRequest, done: Completion<AppRecord>);

    /// Replace the application's package, env and labels and restage it.
    /// The instance count is left as it is.
    fn update_application(&self, guid: &str, request: &PushRequest, done: Completion<AppRecord>);

    fn delete_application(&self, guid: &str, done: Completion<()>);

    fn scale_application(&self, guid: &str, instances: u32, done: Completion<()>);

    fn get_instances(&self, guid: &str, done: Completion<Vec<AppInstance>>);

    /// Recent log lines, oldest first.
    fn recent_logs(&self, guid: &str, done: Completion<Vec<AppLogLine>>);

    fn list_routes(&self, guid: &str, done: Completion<Vec<String>>);

    fn map_route(&self, guid: &str, route: &str, done: Completion<()>);

    fn unmap_route(&self, guid: &str, route: &str, done: Completion<()>);

    fn get_autoscaler(&self, guid: &str, done: Completion<Option<AutoscalerPolicy>>);

    fn attach_autoscaler(&self, guid: &str, policy: &AutoscalerPolicy, done: Completion<()>);

    fn detach_autoscaler(&self, guid: &str, done: Completion<()>);

    fn set_autoscaler_enabled(&self, guid: &str, enabled: bool, done: Completion<()>);
}
