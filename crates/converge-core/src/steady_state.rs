//! Instance-level steady-state check for app-style targets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    Down,
    Failed,
    Unknown,
}

impl InstanceState {
    /// Map a raw platform state; anything unrecognised is `Unknown`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STARTING" => InstanceState::Starting,
            "RUNNING" => InstanceState::Running,
            "CRASHED" => InstanceState::Crashed,
            "DOWN" => InstanceState::Down,
            "FAILED" => InstanceState::Failed,
            _ => InstanceState::Unknown,
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, InstanceState::Crashed | InstanceState::Failed)
    }
}

/// One instance as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstance {
    pub index: u32,
    pub state: InstanceState,
    pub details: Option<String>,
}

impl AppInstance {
    pub fn new(index: u32, state: InstanceState) -> Self {
        Self {
            index,
            state,
            details: None,
        }
    }
}

/// Counts behind one steady-state verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteadyStateReport {
    pub running: u32,
    pub crashed: u32,
    pub desired: u32,
    pub steady: bool,
}

impl fmt::Display for SteadyStateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} instances running, {} crashed",
            self.running, self.desired, self.crashed
        )
    }
}

/// Steady means exactly `desired` instances are running and none has
/// crashed or failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteadyStateChecker;

impl SteadyStateChecker {
    pub fn report(instances: &[AppInstance], desired: u32) -> SteadyStateReport {
        let running = instances
            .iter()
            .filter(|i| i.state == InstanceState::Running)
            .count() as u32;
        let crashed = instances.iter().filter(|i| i.state.is_broken()).count() as u32;
        SteadyStateReport {
            running,
            crashed,
            desired,
            steady: running == desired && crashed == 0,
        }
    }

    pub fn is_steady(instances: &[AppInstance], desired: u32) -> bool {
        Self::report(instances, desired).steady
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(states: &[InstanceState]) -> Vec<AppInstance> {
        states
            .iter()
            .enumerate()
            .map(|(i, s)| AppInstance::new(i as u32, *s))
            .collect()
    }

    #[test]
    fn all_running_is_steady() {
        let instances = fleet(&[InstanceState::Running, InstanceState::Running]);
        assert!(SteadyStateChecker::is_steady(&instances, 2));
    }

    #[test]
    fn starting_instance_is_not_yet_steady() {
        let instances = fleet(&[InstanceState::Running, InstanceState::Starting]);
        let report = SteadyStateChecker::report(&instances, 2);
        assert!(!report.steady);
        assert_eq!(report.running, 1);
        assert_eq!(report.to_string(), "1/2 instances running, 0 crashed");
    }

    #[test]
    fn crashed_instance_blocks_steady_state() {
        let instances = fleet(&[
            InstanceState::Running,
            InstanceState::Running,
            InstanceState::Crashed,
        ]);
        let report = SteadyStateChecker::report(&instances, 2);
        assert!(!report.steady);
        assert_eq!(report.crashed, 1);
    }

    #[test]
    fn scale_to_zero_with_no_instances_is_steady() {
        assert!(SteadyStateChecker::is_steady(&[], 0));
        assert!(!SteadyStateChecker::is_steady(&[], 1));
    }

    #[test]
    fn raw_states() {
        assert_eq!(InstanceState::from_raw("running"), InstanceState::Running);
        assert_eq!(InstanceState::from_raw("CRASHED"), InstanceState::Crashed);
        assert_eq!(InstanceState::from_raw("weird"), InstanceState::Unknown);
    }
}
