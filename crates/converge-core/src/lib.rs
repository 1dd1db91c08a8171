//! Converge Core Library
//!
//! Provider-agnostic engine that drives a remotely managed deployment target
//! (a provisioning stack or a platform application) to a desired state
//! within a time budget, streaming progress events and classifying the
//! terminal outcome.

pub mod bridge;
pub mod budget;
pub mod config;
pub mod coordination;
pub mod cursor;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod log;
pub mod metrics;
pub mod obs;
pub mod provider;
pub mod revision;
pub mod steady_state;
pub mod telemetry;

pub use domain::{
    ConvergeError, DeploymentOutcome, DeploymentSpec, ExistingTargetInfo, OutcomeBuilder,
    OutcomeStatus, Parameter, ProviderError, ProviderResult, ReconciliationStatus, Result,
    StatusSnapshot, TargetDescriptor, TargetEvent, TargetSummary, TemplateSource,
    UpdateSubmission,
};

pub use bridge::{await_completion, Completion, OnError, OnSuccess};
pub use budget::TimeoutBudget;
pub use config::EngineConfig;
pub use coordination::{
    AutoscalerAction, AutoscalerBackend, AutoscalerCoordinator, AutoscalerPolicy, RouteBackend,
    RouteChange, RouteCoordinator, RouteSwap,
};
pub use cursor::EventCursor;
pub use engine::{decide, PollMode, ReconciliationEngine, Verdict};
pub use log::{LogLevel, LogSink, TracingLogSink};
pub use provider::ProviderAdapter;
pub use revision::{
    next_revision, order_releases, release_name, releases_to_prune, ReleaseEntry, ReleaseRevision,
};
pub use steady_state::{AppInstance, InstanceState, SteadyStateChecker, SteadyStateReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
