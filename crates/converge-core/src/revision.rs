//! Revision-suffixed release naming for blue/green history.
//!
//! A release is named `<prefix>__<n>`. Two other shapes coexist in a mixed
//! fleet: `<prefix>__INACTIVE` (a parked release) and the bare prefix (a
//! legacy, non-versioned release that is currently serving).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DELIMITER: &str = "__";
pub const INACTIVE_MARKER: &str = "INACTIVE";

/// Parsed suffix of a release name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseRevision {
    Numbered(u32),
    Inactive,
    Unversioned,
}

impl ReleaseRevision {
    /// Parse the suffix after the last delimiter.
    ///
    /// A name with no delimiter, or whose suffix is neither a number nor the
    /// inactive marker, is unversioned.
    pub fn parse(name: &str) -> Self {
        match name.rfind(DELIMITER) {
            Some(index) => {
                let suffix = &name[index + DELIMITER.len()..];
                if suffix == INACTIVE_MARKER {
                    ReleaseRevision::Inactive
                } else {
                    suffix
                        .parse::<u32>()
                        .map(ReleaseRevision::Numbered)
                        .unwrap_or(ReleaseRevision::Unversioned)
                }
            }
            None => ReleaseRevision::Unversioned,
        }
    }

    pub fn number(&self) -> Option<u32> {
        match self {
            ReleaseRevision::Numbered(n) => Some(*n),
            _ => None,
        }
    }

    fn history_rank(&self) -> (u8, u32) {
        match self {
            ReleaseRevision::Numbered(n) => (0, *n),
            ReleaseRevision::Inactive => (1, 0),
            ReleaseRevision::Unversioned => (2, 0),
        }
    }
}

impl PartialOrd for ReleaseRevision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// History order: numbered releases oldest to newest, then the parked
/// release, then the serving non-versioned one.
impl Ord for ReleaseRevision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.history_rank().cmp(&other.history_rank())
    }
}

/// `<prefix>__<revision>`.
pub fn release_name(prefix: &str, revision: u32) -> String {
    format!("{prefix}{DELIMITER}{revision}")
}

/// `<prefix>__INACTIVE`.
pub fn inactive_name(prefix: &str) -> String {
    format!("{prefix}{DELIMITER}{INACTIVE_MARKER}")
}

/// Order release names as history; ties keep name order.
pub fn order_releases<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut ordered: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
    ordered.sort_by(|a, b| {
        ReleaseRevision::parse(a)
            .cmp(&ReleaseRevision::parse(b))
            .then_with(|| a.cmp(b))
    });
    ordered
}

/// Highest numbered revision plus one; 0 when no release is numbered.
pub fn next_revision<S: AsRef<str>>(names: &[S]) -> u32 {
    names
        .iter()
        .filter_map(|n| ReleaseRevision::parse(n.as_ref()).number())
        .max()
        .map_or(0, |highest| highest.saturating_add(1))
}

/// A prior release and how many instances it still runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub name: String,
    pub instances: u32,
}

impl ReleaseEntry {
    pub fn new(name: impl Into<String>, instances: u32) -> Self {
        Self {
            name: name.into(),
            instances,
        }
    }

    pub fn revision(&self) -> ReleaseRevision {
        ReleaseRevision::parse(&self.name)
    }
}

/// Releases safe to delete before a new one is set up.
///
/// Only numbered releases with zero instances that fall outside the `keep`
/// most recent revisions qualify. Nothing is pruned while the history holds
/// `keep` releases or fewer.
pub fn releases_to_prune(history: &[ReleaseEntry], keep: u32) -> Vec<ReleaseEntry> {
    if history.len() <= keep as usize {
        return Vec::new();
    }
    let names: Vec<&str> = history.iter().map(|r| r.name.as_str()).collect();
    let next = next_revision(&names);
    let oldest_kept = next.saturating_sub(keep);

    let mut prunable: Vec<ReleaseEntry> = history
        .iter()
        .filter(|r| r.instances == 0)
        .filter(|r| matches!(r.revision().number(), Some(n) if n < oldest_kept))
        .cloned()
        .collect();
    prunable.sort_by_key(|r| r.revision());
    prunable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_shapes() {
        assert_eq!(ReleaseRevision::parse("app__7"), ReleaseRevision::Numbered(7));
        assert_eq!(ReleaseRevision::parse("app__INACTIVE"), ReleaseRevision::Inactive);
        assert_eq!(ReleaseRevision::parse("app"), ReleaseRevision::Unversioned);
        assert_eq!(ReleaseRevision::parse("app__x"), ReleaseRevision::Unversioned);
        // The last delimiter decides.
        assert_eq!(
            ReleaseRevision::parse("app_serv_env__2"),
            ReleaseRevision::Numbered(2)
        );
        assert_eq!(ReleaseRevision::parse("a__b__3"), ReleaseRevision::Numbered(3));
    }

    #[test]
    fn mixed_fleet_history_order() {
        let ordered = order_releases(&["app", "app__1", "app__2", "app__INACTIVE"]);
        assert_eq!(ordered, vec!["app__1", "app__2", "app__INACTIVE", "app"]);

        let shuffled = order_releases(&["app__INACTIVE", "app__10", "app", "app__2"]);
        assert_eq!(shuffled, vec!["app__2", "app__10", "app__INACTIVE", "app"]);
    }

    #[test]
    fn next_revision_follows_highest_number() {
        assert_eq!(next_revision::<&str>(&[]), 0);
        assert_eq!(next_revision(&["app", "app__INACTIVE"]), 0);
        assert_eq!(next_revision(&["app__1", "app__4", "app"]), 5);
        assert_eq!(release_name("app", 5), "app__5");
        assert_eq!(inactive_name("PaymentApp"), "PaymentApp__INACTIVE");
    }

    #[test]
    fn prune_keeps_recent_and_running_releases() {
        let history = vec![
            ReleaseEntry::new("app__0", 0),
            ReleaseEntry::new("app__1", 2),
            ReleaseEntry::new("app__2", 0),
            ReleaseEntry::new("app__3", 0),
            ReleaseEntry::new("app__4", 0),
            ReleaseEntry::new("app__5", 1),
        ];
        // next = 6, keep 3 -> revisions below 3 with zero instances go.
        let pruned: Vec<String> = releases_to_prune(&history, 3)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(pruned, vec!["app__0", "app__2"]);
    }

    #[test]
    fn small_history_is_never_pruned() {
        let history = vec![ReleaseEntry::new("app__0", 0), ReleaseEntry::new("app__1", 0)];
        assert!(releases_to_prune(&history, 3).is_empty());
    }

    #[test]
    fn parked_and_legacy_releases_survive_pruning() {
        let history = vec![
            ReleaseEntry::new("app", 0),
            ReleaseEntry::new("app__INACTIVE", 0),
            ReleaseEntry::new("app__0", 0),
            ReleaseEntry::new("app__9", 0),
        ];
        let pruned = releases_to_prune(&history, 1);
        assert_eq!(pruned, vec![ReleaseEntry::new("app__0", 0)]);
    }
}
