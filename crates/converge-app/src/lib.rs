//! Converge app backend
//!
//! [`AppProvider`] drives platform applications through the Converge engine
//! over a callback-style [`AppClient`]. [`AppDeployer`] adds the blue/green
//! release operations: versioned release setup with pruning, resize with a
//! steady-state wait, route swaps and autoscaler configuration.

pub mod client;
pub mod deployer;
pub mod fakes;
pub mod provider;
pub mod status;

pub use client::{
    AppClient, AppConnection, AppLogLine, AppRecord, AppState, PackageState, PushRequest,
};
pub use deployer::{is_release_of, AppDeployer, ReleaseSetup};
pub use provider::AppProvider;
pub use status::{
    classify_code, derive_status, manifest_digest, DerivedStatus, PendingVerb,
    MANIFEST_DIGEST_LABEL,
};
