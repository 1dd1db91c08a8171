//! Per-run cursor over provider events.

use chrono::{DateTime, Utc};

use crate::domain::TargetEvent;

/// Remembers the newest event already surfaced to the operator.
///
/// Scoped to one run and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCursor {
    last_emitted: Option<DateTime<Utc>>,
}

impl EventCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start after `timestamp`, e.g. to skip history from before the run.
    pub fn starting_after(timestamp: DateTime<Utc>) -> Self {
        Self {
            last_emitted: Some(timestamp),
        }
    }

    pub fn last_emitted(&self) -> Option<DateTime<Utc>> {
        self.last_emitted
    }

    /// Return the events newer than the cursor, oldest first, and move the
    /// cursor to the newest of them.
    pub fn advance(&mut self, events: &[TargetEvent]) -> Vec<TargetEvent> {
        let mut fresh: Vec<TargetEvent> = events
            .iter()
            .filter(|event| self.last_emitted.map_or(true, |last| event.timestamp > last))
            .cloned()
            .collect();
        fresh.sort_by_key(|event| event.timestamp);
        if let Some(newest) = fresh.last() {
            self.last_emitted = Some(newest.timestamp);
        }
        fresh
    }
}
