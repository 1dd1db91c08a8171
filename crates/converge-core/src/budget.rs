//! Absolute-deadline time budget.
//!
//! A [`TimeoutBudget`] is fixed at the moment it is started. Every wait in a
//! run is bounded by what is left of it, never by an iteration count.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::{ProviderError, ProviderResult};

/// Deadline derived from a caller-supplied duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    started_at: Instant,
    deadline: Instant,
    total: Duration,
}

impl TimeoutBudget {
    /// Start a budget now.
    pub fn start(total: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            deadline: started_at + total,
            total,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// A budget of at most `limit` that never outlives this one.
    pub fn slice(&self, limit: Duration) -> TimeoutBudget {
        let now = Instant::now();
        let deadline = (now + limit).min(self.deadline);
        TimeoutBudget {
            started_at: now,
            deadline,
            total: deadline.saturating_duration_since(now),
        }
    }

    /// Sleep for `interval`, cut short at the deadline.
    pub async fn sleep(&self, interval: Duration) {
        tokio::time::sleep(interval.min(self.remaining())).await;
    }

    /// Run `fut` bounded by the remaining budget.
    pub async fn bound<T, F>(&self, operation: &str, fut: F) -> ProviderResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::deadline(operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn remaining_shrinks_and_expires() {
        let budget = TimeoutBudget::start(Duration::from_secs(30));
        assert_eq!(budget.remaining(), Duration::from_secs(30));
        assert!(!budget.is_expired());

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(budget.remaining(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(budget.remaining(), Duration::ZERO);
        assert!(budget.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_capped_at_deadline() {
        let budget = TimeoutBudget::start(Duration::from_secs(3));
        let before = Instant::now();
        budget.sleep(Duration::from_secs(10)).await;
        assert_eq!(before.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn slice_never_outlives_parent() {
        let parent = TimeoutBudget::start(Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(50)).await;
        let child = parent.slice(Duration::from_secs(30));
        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.total(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn bound_reports_deadline_exceeded() {
        let budget = TimeoutBudget::start(Duration::from_secs(5));
        let result: ProviderResult<()> = budget
            .bound("DescribeStacks", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_deadline());
        assert!(err.to_string().contains("DescribeStacks"));
    }
}
