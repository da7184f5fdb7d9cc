//! Core configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Platform class the allocator runs on.
///
/// Mobile platforms have cheap process startup and an OS reclaimer that looks
/// at importance levels, so several behaviours switch on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PoolConfig {
    /// Spare pool feature toggles
    pub spare: SpareConfig,
    /// Process model settings
    pub process: ProcessConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Spare renderer pool toggles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpareConfig {
    /// Keep more than one spare warm at a time
    pub multiple_spares: bool,
    /// Number of spares kept when `multiple_spares` is on
    pub multiple_spares_count: usize,
    /// Refill the pool after every allocation
    pub keep_spare_at_all_times: bool,
    /// Only hand spares to navigation requests
    pub only_for_navigation: bool,
    /// Destroy spares when the application moves to the background
    pub kill_when_backgrounded: bool,
    /// On mobile, warm a spare with a timeout instead of deferring creation
    pub warmup_with_timeout: bool,
    /// Timeout used by `warmup_with_timeout`
    pub warmup_timeout_ms: u64,
    /// Physical memory required before extra spares are started
    pub extra_spare_min_memory_mb: u64,
}

/// Process model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Platform class
    pub platform: Platform,
    /// Run renderers inside the browser process
    pub single_process: bool,
    /// Give every site a dedicated, locked process
    pub site_per_process: bool,
    /// Sites collapsed to one process per browser context
    pub process_per_site: Vec<String>,
    /// Renderer process cap; `None` uses the platform default
    pub max_renderer_process_count: Option<usize>,
    /// Upper bound for timed keep-alive handles
    pub keep_alive_timeout_ms: u64,
    /// Physical memory assumed at startup
    pub physical_memory_mb: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Include targets, thread ids and source locations in each line
    pub debug: bool,
}

impl Default for SpareConfig {
    fn default() -> Self {
        Self {
            multiple_spares: false,
            multiple_spares_count: 2,
            keep_spare_at_all_times: true,
            only_for_navigation: false,
            kill_when_backgrounded: false,
            warmup_with_timeout: false,
            warmup_timeout_ms: 5_000,
            extra_spare_min_memory_mb: 4_096,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Desktop,
            single_process: false,
            site_per_process: true,
            process_per_site: Vec::new(),
            max_renderer_process_count: None,
            keep_alive_timeout_ms: 30_000,
            physical_memory_mb: 8_192,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl SpareConfig {
    /// Number of spares the pool aims to hold
    pub fn target_spare_count(&self) -> usize {
        if self.multiple_spares {
            self.multiple_spares_count.max(1)
        } else {
            1
        }
    }

    /// Timeout applied by the mobile warm-up path, when it is active
    pub fn mobile_warmup_timeout(&self, platform: Platform) -> Option<Duration> {
        (platform == Platform::Mobile && self.warmup_with_timeout)
            .then(|| Duration::from_millis(self.warmup_timeout_ms))
    }
}

impl ProcessConfig {
    /// Keep-alive timeout as a duration
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl PoolConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.spare.multiple_spares && self.spare.multiple_spares_count == 0 {
            return Err(ConfigError::Validation(
                "multiple_spares_count must be greater than 0".to_string(),
            ));
        }
        if self.spare.warmup_with_timeout && self.spare.warmup_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "warmup_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.process.keep_alive_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "keep_alive_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.process.max_renderer_process_count == Some(0) {
            return Err(ConfigError::Validation(
                "max_renderer_process_count must be greater than 0 when set".to_string(),
            ));
        }
        if let Some(site) = self
            .process
            .process_per_site
            .iter()
            .find(|site| !site.contains("://"))
        {
            return Err(ConfigError::Validation(format!(
                "process_per_site entry is not a URL: {}",
                site
            )));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown log level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_spare_count() {
        let mut spare = SpareConfig::default();
        assert_eq!(spare.target_spare_count(), 1);

        spare.multiple_spares = true;
        spare.multiple_spares_count = 3;
        assert_eq!(spare.target_spare_count(), 3);
    }

    #[test]
    fn test_mobile_warmup_timeout_only_on_mobile() {
        let spare = SpareConfig {
            warmup_with_timeout: true,
            warmup_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(spare.mobile_warmup_timeout(Platform::Desktop), None);
        assert_eq!(
            spare.mobile_warmup_timeout(Platform::Mobile),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_validation_rejects_bad_level() {
        let mut config = PoolConfig::default();
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_zero_process_count() {
        let mut config = PoolConfig::default();
        config.process.max_renderer_process_count = Some(0);
        assert!(config.validate().is_err());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn prop_multi_spare_count_is_honoured(count in 1..64usize) {
                let mut config = PoolConfig::default();
                config.spare.multiple_spares = true;
                config.spare.multiple_spares_count = count;
                prop_assert!(config.validate().is_ok());
                prop_assert_eq!(config.spare.target_spare_count(), count);
            }

            #[test]
            fn prop_levels_are_case_insensitive(index in 0..5usize, upper in any::<bool>()) {
                let mut config = PoolConfig::default();
                let level = LOG_LEVELS[index];
                config.logging.level = if upper { level.to_uppercase() } else { level.to_string() };
                prop_assert!(config.validate().is_ok());
            }

            #[test]
            fn prop_config_survives_toml(
                keep in any::<bool>(),
                timeout in 1..100_000u64,
                memory in 512..65_536u64
            ) {
                let mut config = PoolConfig::default();
                config.spare.keep_spare_at_all_times = keep;
                config.spare.warmup_timeout_ms = timeout;
                config.process.physical_memory_mb = memory;
                let text = toml::to_string(&config).unwrap();
                let parsed: PoolConfig = toml::from_str(&text).unwrap();
                prop_assert_eq!(parsed, config);
            }
        }
    }
}
