//! Converge stack backend
//!
//! Drives declarative provisioning stacks through the Converge engine:
//! a [`StackClient`] over the stack service, the raw status table, and the
//! [`StackProvider`] adapter that turns the service's "No updates are to be
//! performed" rejection into a first-class no-change signal.

pub mod client;
pub mod fakes;
pub mod provider;
pub mod status;

pub use client::{
    StackApiError, StackApiResult, StackClient, StackConnection, StackDescription,
    StackEventRecord, StackOutput, StackRequest,
};
pub use provider::{to_provider_error, StackProvider};
pub use status::{classify, is_no_updates_message, STATUS_TABLE};
