//! Ingest configuration.

use serde::{Deserialize, Serialize};
use sitegrid_core::{Error, Result};

use crate::error::IngestError;

/// Configuration for the ingest pipeline and its background retirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of ingest workers.
    pub worker_count: usize,
    /// Segments holding more passes than this are cleaved after a merge.
    pub max_passes_per_segment: usize,
    /// Minimum age in seconds of a retirement entry before it is purged.
    pub retirement_delay_secs: u64,
    /// Whether superseded segments are queued for retirement.
    pub retirement_enabled: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_passes_per_segment: 10_000,
            retirement_delay_secs: 600,
            retirement_enabled: true,
        }
    }
}

impl IngestConfig {
    /// Loads configuration from `SITEGRID_*` environment variables, falling
    /// back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable does not parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_usize("SITEGRID_WORKER_COUNT")? {
            config.worker_count = v;
        }
        if let Some(v) = env_usize("SITEGRID_MAX_PASSES_PER_SEGMENT")? {
            config.max_passes_per_segment = v;
        }
        if let Some(v) = env_u64("SITEGRID_RETIREMENT_DELAY_SECS")? {
            config.retirement_delay_secs = v;
        }
        if let Some(v) = env_bool("SITEGRID_RETIREMENT_ENABLED")? {
            config.retirement_enabled = v;
        }
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> std::result::Result<(), IngestError> {
        if self.worker_count == 0 {
            return Err(IngestError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.max_passes_per_segment < 2 {
            return Err(IngestError::InvalidConfig(
                "max_passes_per_segment must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Retirement delay as a duration.
    #[must_use]
    pub fn retirement_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retirement_delay_secs).unwrap_or(i64::MAX))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}
