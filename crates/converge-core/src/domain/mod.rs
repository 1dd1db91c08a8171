//! Domain model for Converge.
//!
//! - `DeploymentSpec`: immutable desired state of one target
//! - `ReconciliationStatus`: closed classification of provider statuses
//! - `TargetDescriptor` / `StatusSnapshot`: what the provider reports
//! - `DeploymentOutcome`: immutable result of a run

pub mod error;
pub mod outcome;
pub mod spec;
pub mod status;
pub mod target;

pub use error::{ConvergeError, ProviderError, ProviderResult, Result};
pub use outcome::{DeploymentOutcome, OutcomeBuilder, OutcomeStatus};
pub use spec::{DeploymentSpec, Parameter, TemplateSource};
pub use status::ReconciliationStatus;
pub use target::{
    ExistingTargetInfo, StatusSnapshot, TargetDescriptor, TargetEvent, TargetSummary,
    UpdateSubmission,
};
