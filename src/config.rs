//! SDK configuration, loaded once at `init`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::AdError;

/// Settings passed to [`AdSdk::init`](crate::AdSdk::init).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// fetch_workers = 4
/// default_refresh_interval_secs = 60
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdsConfig {
    /// Background threads running [`AdSource::fetch`](crate::fetch::AdSource::fetch).
    pub fetch_workers: usize,
    /// Auto-refresh period given to new instances; `0` disables it.
    pub default_refresh_interval_secs: u64,
    /// Whether new instances start visible.
    pub ads_visible_by_default: bool,
    /// Capacity of the [`AdEvent`](crate::AdEvent) channel. Events beyond
    /// it are dropped until the host drains the channel.
    pub event_capacity: usize,
    /// Upper bound on live instances; further requests fail.
    pub max_instances: usize,
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 2,
            default_refresh_interval_secs: 0,
            ads_visible_by_default: true,
            event_capacity: 256,
            max_instances: 1024,
        }
    }
}

impl AdsConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`AdError::Config`] on syntax errors, unknown keys, or values that
    /// fail [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self, AdError> {
        let config: Self = toml::from_str(source).map_err(|e| AdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`AdError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), AdError> {
        if self.fetch_workers == 0 {
            return Err(AdError::Config("fetch_workers must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(AdError::Config("event_capacity must be at least 1".into()));
        }
        if self.max_instances == 0 || self.max_instances > u32::MAX as usize / 2 {
            return Err(AdError::Config(format!(
                "max_instances out of range: {}",
                self.max_instances
            )));
        }
        Ok(())
    }

    /// [`default_refresh_interval_secs`](Self::default_refresh_interval_secs)
    /// as a duration.
    #[must_use]
    pub fn default_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.default_refresh_interval_secs)
    }
}
