//! Bridge from callback-style provider APIs to one bounded wait per call.
//!
//! A backend that reports results through success/error callbacks is handed
//! a [`Completion`]. The caller awaits it with [`await_completion`], bounded by
//! the remaining [`TimeoutBudget`]. The completion's own state is the only
//! record of whether the call finished and how.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::budget::TimeoutBudget;
use crate::domain::{ProviderError, ProviderResult};

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, String>>>>>;

/// Single-fire completion handed to a callback-style backend.
pub struct Completion<T> {
    tx: oneshot::Sender<Result<T, String>>,
}

impl<T> Completion<T> {
    /// Resolve with a value.
    pub fn succeed(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Resolve with the backend's error message.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into()));
    }

    pub fn complete(self, result: Result<T, String>) {
        let _ = self.tx.send(result);
    }

    /// Split into independent success and error callbacks.
    ///
    /// Whichever callback fires first resolves the completion; later calls
    /// on either side are ignored.
    pub fn split(self) -> (OnSuccess<T>, OnError<T>) {
        let slot: Slot<T> = Arc::new(Mutex::new(Some(self.tx)));
        (
            OnSuccess { slot: slot.clone() },
            OnError { slot },
        )
    }
}

/// Success half of a split [`Completion`].
pub struct OnSuccess<T> {
    slot: Slot<T>,
}

impl<T> OnSuccess<T> {
    pub fn call(&self, value: T) {
        fire(&self.slot, Ok(value));
    }
}

/// Error half of a split [`Completion`].
pub struct OnError<T> {
    slot: Slot<T>,
}

impl<T> OnError<T> {
    pub fn call(&self, message: impl Into<String>) {
        fire(&self.slot, Err(message.into()));
    }
}

fn fire<T>(slot: &Slot<T>, result: Result<T, String>) {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(tx) = sender {
        let _ = tx.send(result);
    }
}

/// Register a completion with a backend and wait for it within `budget`.
///
/// Returns `DeadlineExceeded` when the budget runs out first, and a
/// `Backend` error carrying the backend's message when the error callback
/// fires or the completion is dropped unresolved.
pub async fn await_completion<T, F>(
    operation: &str,
    budget: &TimeoutBudget,
    register: F,
) -> ProviderResult<T>
where
    F: FnOnce(Completion<T>),
{
    let (tx, rx) = oneshot::channel();
    register(Completion { tx });

    match tokio::time::timeout_at(budget.deadline(), rx).await {
        Err(_) => Err(ProviderError::deadline(operation)),
        Ok(Err(_)) => Err(ProviderError::backend(
            operation,
            "backend dropped the completion without a result",
        )),
        Ok(Ok(Err(message))) => Err(ProviderError::backend(operation, message)),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}
