//! Canvas configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! [precision]
//! max_bits = 384
//!
//! [throttle]
//! period_ms = 100
//! burst = 10
//!
//! [scheduler]
//! min_block_depth = 3
//! event_capacity = 256
//! write_priority = -1.0
//!
//! [store]
//! dry_delay_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use zoomcanvas_coord::Precision;

use crate::constants::{
    DEFAULT_DRY_DELAY, DEFAULT_EVENT_CAPACITY, DEFAULT_MIN_BLOCK_DEPTH, DEFAULT_THROTTLE_BURST,
    DEFAULT_THROTTLE_PERIOD, DEFAULT_WRITE_PRIORITY,
};

/// Errors loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub precision: PrecisionConfig,
    pub throttle: ThrottleConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    /// Fractional bits kept by coordinate arithmetic.
    pub max_bits: u32,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            max_bits: Precision::default().max_bits(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub period_ms: u64,
    pub burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_THROTTLE_PERIOD.as_millis() as u64,
            burst: DEFAULT_THROTTLE_BURST,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shallowest block depth `get_block` will serve.
    pub min_block_depth: u32,
    pub event_capacity: usize,
    /// Queue priority of paint requests; lower runs first.
    pub write_priority: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_block_depth: DEFAULT_MIN_BLOCK_DEPTH,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            write_priority: DEFAULT_WRITE_PRIORITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Authoritative stores dry painted cells after this long.
    pub dry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dry_delay_ms: DEFAULT_DRY_DELAY.as_millis() as u64,
        }
    }
}

impl CanvasConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CanvasConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.precision.max_bits == 0 {
            return Err(ConfigError::Invalid("precision.max_bits must be positive".into()));
        }
        if self.throttle.period_ms == 0 {
            return Err(ConfigError::Invalid("throttle.period_ms must be positive".into()));
        }
        if self.throttle.burst == 0 {
            return Err(ConfigError::Invalid("throttle.burst must be positive".into()));
        }
        if !self.scheduler.write_priority.is_finite() {
            return Err(ConfigError::Invalid("scheduler.write_priority must be finite".into()));
        }
        Ok(())
    }

    pub fn precision(&self) -> Precision {
        Precision::new(self.precision.max_bits)
    }

    pub fn throttle_period(&self) -> Duration {
        Duration::from_millis(self.throttle.period_ms)
    }

    pub fn dry_delay(&self) -> Duration {
        Duration::from_millis(self.store.dry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = CanvasConfig::from_toml_str("").unwrap();
        assert_eq!(config, CanvasConfig::default());
        assert_eq!(config.precision().max_bits(), 384);
        assert_eq!(config.throttle_period(), Duration::from_millis(100));
        assert_eq!(config.throttle.burst, 10);
        assert_eq!(config.scheduler.min_block_depth, 3);
        assert_eq!(config.dry_delay(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_partial_sections() {
        let config = CanvasConfig::from_toml_str(
            r#"
            [throttle]
            burst = 6

            [store]
            dry_delay_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.throttle.burst, 6);
        assert_eq!(config.throttle.period_ms, 100);
        assert_eq!(config.dry_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            CanvasConfig::from_toml_str("[throttle]\nburst = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CanvasConfig::from_toml_str("[precision]\nmax_bits = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CanvasConfig::from_toml_str("[throttle]\nburst = \"many\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nmin_block_depth = 4").unwrap();
        let config = CanvasConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler.min_block_depth, 4);

        let missing = file.path().with_extension("missing");
        assert!(matches!(CanvasConfig::load(&missing), Err(ConfigError::Io { .. })));
    }
}
