//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (`BEACONWATCH_CONFIG`, else the platform config
//!    directory, e.g. `~/.config/beaconwatch/config.toml`),
//! 3. `BEACONWATCH__`-prefixed environment variables, `__` between levels
//!    (`BEACONWATCH__SERVER__PORT=9000`).
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [scanner]
//! rssi_filter = "arma"
//! filter_tuning = 0.1
//!
//! [delivery]
//! policy = "live_or_deferred"
//! max_attempts = 10
//! drain_timeout_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dispatcher::{DeliveryPolicy, RetryPolicy, DEFAULT_DRAIN_TIMEOUT};
use crate::scanner::{
    is_valid_beacon_layout, FilterSettings, ForegroundServiceConfig, RssiFilter, ScanPeriods,
    IBEACON_LAYOUT,
};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "BEACONWATCH_CONFIG";

/// Prefix of configuration override environment variables.
pub const ENV_PREFIX: &str = "BEACONWATCH";

/// Errors from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// One field is invalid.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// =============================================================================
// Sections
// =============================================================================

/// HTTP host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Events buffered per slow live subscriber before it lags.
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            event_buffer: 256,
        }
    }
}

/// Settings passed through to the scanning engine at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// RSSI smoothing filter.
    pub rssi_filter: RssiFilter,
    /// Filter tuning; `0` keeps the engine default.
    pub filter_tuning: f64,
    /// Scan cadence.
    pub scan_periods: ScanPeriods,
    /// Advertisement layouts registered with the engine.
    pub beacon_layouts: Vec<String>,
    /// Foreground service to enable at startup.
    pub foreground_service: Option<ForegroundServiceConfig>,
    /// Tell apart beacons sharing identifiers by hardware address.
    pub hardware_equality_enforced: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            rssi_filter: RssiFilter::RunningAverage,
            filter_tuning: 0.0,
            scan_periods: ScanPeriods::default(),
            beacon_layouts: vec![IBEACON_LAYOUT.to_string()],
            foreground_service: None,
            hardware_equality_enforced: false,
        }
    }
}

impl ScannerConfig {
    /// Filter settings for the engine.
    #[must_use]
    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings::new(self.rssi_filter, self.filter_tuning)
    }
}

/// Deferred delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Routing policy.
    pub policy: DeliveryPolicy,
    /// Spool directory; the platform data directory when unset.
    pub spool_dir: Option<PathBuf>,
    /// Delay after the first failed submission, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Cap on any single retry delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Give up after this many attempts; unset retries forever.
    pub max_attempts: Option<u32>,
    /// How long flush and shutdown wait for the spool to take queued
    /// records, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            policy: DeliveryPolicy::default(),
            spool_dir: None,
            initial_backoff_ms: duration_ms(retry.initial_backoff),
            max_backoff_ms: duration_ms(retry.max_backoff),
            max_attempts: retry.max_attempts,
            drain_timeout_ms: duration_ms(DEFAULT_DRAIN_TIMEOUT),
        }
    }
}

impl DeliveryConfig {
    /// Retry schedule for the deferred sink.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_attempts,
        }
    }

    /// Drain deadline for the dispatcher.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Config
// =============================================================================

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP host.
    pub server: ServerConfig,
    /// Engine pass-through settings.
    pub scanner: ScannerConfig,
    /// Deferred delivery.
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Loads configuration from the default locations.
    ///
    /// A file named by `BEACONWATCH_CONFIG` must exist; the platform default
    /// file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result is invalid.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Path::new(&path), true),
            None => match Self::default_path() {
                Some(path) => Self::load_from(&path, false),
                None => Self::load_layers(None),
            },
        }
    }

    /// Loads `path` (if present) layered under environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `required` and the file is
    /// missing, or a load/validation error.
    pub fn load_from(path: &Path, required: bool) -> ConfigResult<Self> {
        if path.exists() {
            Self::load_layers(Some(path))
        } else if required {
            Err(ConfigError::NotFound(path.to_path_buf()))
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Self::load_layers(None)
        }
    }

    fn load_layers(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        let loaded: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Writes the configuration as TOML to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        let write = |path: &Path| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content.as_bytes())
        };
        write(path).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Platform configuration file path, if a home directory is known.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "beaconwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Checks every field, collecting all violations.
    ///
    /// # Errors
    ///
    /// Returns the single violation, or
    /// [`ConfigError::MultipleValidationErrors`] if there are several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push(invalid("server.host", "must not be empty"));
        }
        if self.server.port == 0 {
            errors.push(invalid("server.port", "must be greater than 0"));
        }
        if self.server.event_buffer == 0 {
            errors.push(invalid("server.event_buffer", "must be greater than 0"));
        }

        if !self.scanner.filter_tuning.is_finite() {
            errors.push(invalid("scanner.filter_tuning", "must be a finite number"));
        }
        if let Err(e) = self.scanner.scan_periods.validate() {
            errors.push(invalid("scanner.scan_periods", e.to_string()));
        }
        for layout in &self.scanner.beacon_layouts {
            if !is_valid_beacon_layout(layout) {
                errors.push(invalid(
                    "scanner.beacon_layouts",
                    format!("'{layout}' is not a valid layout"),
                ));
            }
        }
        if let Some(service) = &self.scanner.foreground_service {
            if let Err(e) = service.validate() {
                errors.push(invalid("scanner.foreground_service", e.to_string()));
            }
        }

        if self.delivery.initial_backoff_ms == 0 {
            errors.push(invalid("delivery.initial_backoff_ms", "must be greater than 0"));
        }
        if self.delivery.max_backoff_ms < self.delivery.initial_backoff_ms {
            errors.push(invalid(
                "delivery.max_backoff_ms",
                "must not be less than initial_backoff_ms",
            ));
        }
        if self.delivery.max_attempts == Some(0) {
            errors.push(invalid("delivery.max_attempts", "must be greater than 0"));
        }
        if self.delivery.drain_timeout_ms == 0 {
            errors.push(invalid("delivery.drain_timeout_ms", "must be greater than 0"));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scanner.beacon_layouts, [IBEACON_LAYOUT]);
        assert_eq!(config.delivery.policy, DeliveryPolicy::LiveOrDeferred);
        assert_eq!(config.scanner.filter_settings().tuning, None);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [scanner]
                rssi_filter = "arma"
                filter_tuning = 0.1

                [delivery]
                policy = "deferred_only"
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path, true).unwrap();
        assert_eq!(config.scanner.rssi_filter, RssiFilter::Arma);
        assert_eq!(config.scanner.filter_settings().tuning, Some(0.1));
        assert_eq!(config.delivery.policy, DeliveryPolicy::DeferredOnly);
        assert_eq!(config.scanner.beacon_layouts, [IBEACON_LAYOUT]);
    }

    #[test]
    fn test_missing_required_file() {
        let err = Config::load_from(Path::new("/nonexistent/beaconwatch.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/beaconwatch.toml"), false).unwrap();
        assert_eq!(config.scanner, ScannerConfig::default());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[delivery]\nmax_attempts = 3\n").unwrap();

        std::env::set_var("BEACONWATCH__DELIVERY__MAX_ATTEMPTS", "7");
        let config = Config::load_from(&path, true);
        std::env::remove_var("BEACONWATCH__DELIVERY__MAX_ATTEMPTS");

        assert_eq!(config.unwrap().delivery.max_attempts, Some(7));
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.server.port = 0;
        config.scanner.beacon_layouts.push("garbage".into());
        config.delivery.max_attempts = Some(0);
        config.delivery.drain_timeout_ms = 0;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = Config::default();
        config.server.host = String::new();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ValidationError { ref field, .. } if field == "server.host"
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.server.port = 9100;
        config.delivery.spool_dir = Some(dir.path().join("spool"));
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path, true).unwrap();
        assert_eq!(reloaded.server.port, 9100);
        assert_eq!(reloaded.delivery.spool_dir, config.delivery.spool_dir);
    }

    #[test]
    fn test_retry_policy_from_delivery() {
        let delivery = DeliveryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            max_attempts: Some(5),
            ..DeliveryConfig::default()
        };
        let retry = delivery.retry_policy();
        assert_eq!(retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(retry.max_attempts, Some(5));
        assert_eq!(delivery.drain_timeout(), Duration::from_secs(10));
    }
}
