//! Application configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/scan.toml` (or a file given on the command line)
//! 2. Environment variables prefixed with `RUST_SCAN_`
//!
//! Nested keys are separated by `_` in environment variables, e.g.
//! `RUST_SCAN_APPLICATION_NAME=bench`. Keys that contain `_` themselves
//! can only be set from the file.
//!
//! # Example
//! ```no_run
//! use rust_scan::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("sweeping {} to {}", config.scan.minimum, config.scan.maximum);
//! # Ok::<(), rust_scan::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use scan_driver_mock::{AcquisitionMode, MockDataSourceConfig, MockManipulatorConfig};
use scan_engine::{ScanConfig, SweepPlan, TabularScanConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RUST_SCAN_";

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value did not deserialize
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The values are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Application name and log level
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Sweep parameters
    pub scan: ScanConfig,

    /// Simulated hardware
    #[serde(default)]
    pub mock: MockHardwareConfig,

    /// Tabular sweep settings
    #[serde(default)]
    pub table: Option<TableConfig>,
}

/// `[application]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    /// Name reported in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust_scan".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// `[mock]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockHardwareConfig {
    /// Simulated stage
    #[serde(default)]
    pub manipulator: MockManipulatorConfig,
    /// Simulated detector
    #[serde(default)]
    pub data_source: MockDataSourceConfig,
}

/// `[table]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableConfig {
    /// Table file used when none is given on the command line
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Tabular sweep parameters
    #[serde(flatten)]
    pub settings: TabularScanConfig,
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        SweepPlan::from_config(&self.scan).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let manipulator_unit = self.mock.manipulator.unit;
        if !self.scan.step.unit().is_compatible(&manipulator_unit) {
            return Err(ConfigError::Invalid(format!(
                "scan step {} cannot drive a manipulator working in {}",
                self.scan.step, manipulator_unit
            )));
        }

        if self.mock.manipulator.velocity <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "mock manipulator velocity must be positive, got {}",
                self.mock.manipulator.velocity
            )));
        }
        if let (Some(min), Some(max)) = (
            self.mock.manipulator.min_position,
            self.mock.manipulator.max_position,
        ) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "mock manipulator min_position {} exceeds max_position {}",
                    min, max
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.mock.manipulator.failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "failure_rate must be within [0, 1], got {}",
                self.mock.manipulator.failure_rate
            )));
        }

        if self.scan.continuous_scan
            && self.mock.data_source.acquisition != AcquisitionMode::Triggered
        {
            return Err(ConfigError::Invalid(
                "continuous_scan requires mock.data_source.acquisition = \"triggered\"".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use scan_core::units::{MILLIMETER, MILLIMETER_PER_SECOND};
    use scan_core::Quantity;
    use std::time::Duration;

    const CONFIG: &str = r#"
        [application]
        name = "test bench"
        log_level = "debug"

        [scan]
        minimum = "0 mm"
        maximum = "10 mm"
        step = "2 mm"
        scan_velocity = "5 mm/s"
        settle_timeout = "2s"

        [mock.manipulator]
        unit = "mm"
        trigger_resolution = 0.01

        [mock.data_source]
        acquisition = "triggered"
        missing_samples = 1

        [table]
        path = "positions.csv"
        retract_at_end = true
    "#;

    #[test]
    fn test_load_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file("scan.toml", CONFIG)?;
            let config = AppConfig::load_from("scan.toml").map_err(|e| e.to_string())?;

            assert_eq!(config.application.name, "test bench");
            assert_eq!(config.scan.step, Quantity::new(2.0, MILLIMETER));
            assert_eq!(
                config.scan.scan_velocity,
                Some(Quantity::new(5.0, MILLIMETER_PER_SECOND))
            );
            assert_eq!(config.scan.settle_timeout, Some(Duration::from_secs(2)));
            assert_eq!(config.mock.manipulator.trigger_resolution, Some(0.01));
            assert_eq!(config.mock.data_source.missing_samples, 1);

            let table = config.table.clone().unwrap();
            assert_eq!(table.path, Some(PathBuf::from("positions.csv")));
            assert!(table.settings.retract_at_end);

            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("scan.toml", CONFIG)?;
            jail.set_env("RUST_SCAN_APPLICATION_NAME", "from env");
            let config = AppConfig::load_from("scan.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.name, "from env");
            Ok(())
        });
    }

    #[test]
    fn test_missing_scan_section_fails() {
        Jail::expect_with(|jail| {
            jail.create_file("scan.toml", "[application]\nname = \"x\"\nlog_level = \"info\"\n")?;
            assert!(matches!(
                AppConfig::load_from("scan.toml"),
                Err(ConfigError::Load(_))
            ));
            Ok(())
        });
    }

    fn valid() -> AppConfig {
        AppConfig {
            application: ApplicationConfig::default(),
            scan: ScanConfig::new(
                Quantity::new(0.0, MILLIMETER),
                Quantity::new(5.0, MILLIMETER),
                Quantity::new(1.0, MILLIMETER),
            ),
            mock: MockHardwareConfig::default(),
            table: None,
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid();
        assert!(config.validate().is_ok());
        config.application.log_level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_continuous_needs_triggered_source() {
        let mut config = valid();
        config.scan.continuous_scan = true;
        assert!(config.validate().is_err());

        config.mock.data_source.acquisition = AcquisitionMode::Triggered;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_sweep_is_invalid() {
        let mut config = valid();
        config.scan.maximum = config.scan.minimum;
        assert!(config.validate().is_err());
    }
}
