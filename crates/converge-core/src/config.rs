//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{ConvergeError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RELEASES_TO_KEEP: u32 = 3;

/// Configuration shared by every run of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sleep between poll ticks (capped by the remaining budget).
    pub poll_interval: Duration,
    /// Budget for deleting a dead target before recreating it. Falls back
    /// to the spec's own timeout when unset.
    pub delete_timeout: Option<Duration>,
    /// Release revisions kept when pruning app-style history.
    pub max_release_versions_to_keep: u32,
    /// Upper bound for a single provider call, within the run budget.
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            delete_timeout: None,
            max_release_versions_to_keep: DEFAULT_RELEASES_TO_KEEP,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// On-disk shape, every field optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    poll_interval_secs: Option<u64>,
    delete_timeout_secs: Option<u64>,
    max_release_versions_to_keep: Option<u32>,
    call_timeout_secs: Option<u64>,
}

impl EngineConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = Some(timeout);
        self
    }

    pub fn with_releases_to_keep(mut self, keep: u32) -> Self {
        self.max_release_versions_to_keep = keep;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Create from environment variables
    ///
    /// Reads (all optional):
    /// - CONVERGE_POLL_INTERVAL_SECS
    /// - CONVERGE_DELETE_TIMEOUT_SECS
    /// - CONVERGE_RELEASES_TO_KEEP
    /// - CONVERGE_CALL_TIMEOUT_SECS
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] over an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|e| ConvergeError::Config(format!("{key}={raw}: {e}")))
                })
                .transpose()
        };
        let keep = lookup("CONVERGE_RELEASES_TO_KEEP")
            .map(|raw| {
                raw.trim().parse::<u32>().map_err(|e| {
                    ConvergeError::Config(format!("CONVERGE_RELEASES_TO_KEEP={raw}: {e}"))
                })
            })
            .transpose()?;

        ConfigFile {
            poll_interval_secs: secs("CONVERGE_POLL_INTERVAL_SECS")?,
            delete_timeout_secs: secs("CONVERGE_DELETE_TIMEOUT_SECS")?,
            max_release_versions_to_keep: keep,
            call_timeout_secs: secs("CONVERGE_CALL_TIMEOUT_SECS")?,
        }
        .resolve()
    }

    /// Parse a TOML document such as:
    ///
    /// ```toml
    /// poll_interval_secs = 5
    /// delete_timeout_secs = 600
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| ConvergeError::Config(e.to_string()))?;
        file.resolve()
    }

    pub fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML, the same shape `from_toml_str` reads.
    pub fn to_toml_string(&self) -> Result<String> {
        let file = ConfigFile {
            poll_interval_secs: Some(self.poll_interval.as_secs()),
            delete_timeout_secs: self.delete_timeout.map(|d| d.as_secs()),
            max_release_versions_to_keep: Some(self.max_release_versions_to_keep),
            call_timeout_secs: Some(self.call_timeout.as_secs()),
        };
        toml::to_string(&file).map_err(|e| ConvergeError::Config(e.to_string()))
    }
}

impl ConfigFile {
    fn resolve(self) -> Result<EngineConfig> {
        let mut config = EngineConfig::default();
        if let Some(secs) = self.poll_interval_secs {
            if secs == 0 {
                return Err(ConvergeError::Config(
                    "poll interval must be greater than zero".to_string(),
                ));
            }
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.delete_timeout_secs {
            config.delete_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(keep) = self.max_release_versions_to_keep {
            config.max_release_versions_to_keep = keep;
        }
        if let Some(secs) = self.call_timeout_secs {
            if secs == 0 {
                return Err(ConvergeError::Config(
                    "call timeout must be greater than zero".to_string(),
                ));
            }
            config.call_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
