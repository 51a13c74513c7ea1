// engine/src/config.rs
//
// Index Configuration
//
// Every knob of a learned index instance lives here and is fixed for the
// lifetime of that instance. Priority order (highest to lowest):
// 1. Environment variables (LEARNED_INDEX__* prefix)
// 2. Config file (TOML/YAML/JSON, optional)
// 3. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Search window the default error threshold allows before a partition falls
/// back to an exact tree.
pub const DEFAULT_MAX_SECOND_STAGE_ERROR: usize = 64;

/// Overflow records tolerated before `insert` forces a rebuild.
pub const DEFAULT_MAX_OVERFLOW_SIZE: usize = 10_000;

/// Number of second-stage experts.
pub const DEFAULT_STAGE_COUNT: usize = 100;

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Complete configuration of one recursive model index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Hyperparameters of the router (first stage)
    pub first_stage: NetworkParameters,

    /// Hyperparameters shared by every expert (second stage)
    pub second_stage: NetworkParameters,

    /// Max absolute in-sample position error an expert may keep before it is
    /// replaced by an exact tree
    pub max_second_stage_error: usize,

    /// Overflow records tolerated before `insert` triggers a rebuild
    pub max_overflow_size: usize,

    /// Number of second-stage experts (N)
    pub stage_count: usize,

    /// RNG seed for batch sampling and weight initialisation.
    /// `None` seeds from OS entropy.
    pub seed: Option<u64>,

    /// Background rebuild behaviour
    pub rebuild: RebuildConfig,

    /// Logging configuration (consumed by `telemetry::init_tracing`)
    pub logging: LoggingConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            first_stage: NetworkParameters::default(),
            second_stage: NetworkParameters::linear(),
            max_second_stage_error: DEFAULT_MAX_SECOND_STAGE_ERROR,
            max_overflow_size: DEFAULT_MAX_OVERFLOW_SIZE,
            stage_count: DEFAULT_STAGE_COUNT,
            seed: None,
            rebuild: RebuildConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============================================================================
// Network Parameters
// ============================================================================

/// Hyperparameters for one stage's approximator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkParameters {
    /// Records sampled per training step
    pub batch_size: usize,

    /// Training steps; there is no convergence check
    pub max_epochs: usize,

    /// Adam learning rate
    pub learning_rate: f32,

    /// Hidden ReLU units. 0 builds a purely linear model.
    pub width: usize,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            batch_size: 128,
            max_epochs: 10_000,
            learning_rate: 0.01,
            width: 8,
        }
    }
}

impl NetworkParameters {
    /// Single dense unit with bias, the usual second-stage shape.
    pub fn linear() -> Self {
        Self {
            width: 0,
            ..Self::default()
        }
    }

    /// Batch size actually used against `available` records; never larger than
    /// the data so batch sampling always terminates.
    pub fn effective_batch_size(&self, available: usize) -> usize {
        self.batch_size.min(available)
    }

    fn validate(&self, stage: &str) -> Result<()> {
        anyhow::ensure!(
            self.batch_size > 0,
            "{}.batch_size must be > 0, got {}",
            stage,
            self.batch_size
        );
        anyhow::ensure!(
            self.max_epochs > 0,
            "{}.max_epochs must be > 0, got {}",
            stage,
            self.max_epochs
        );
        anyhow::ensure!(
            self.learning_rate.is_finite() && self.learning_rate > 0.0,
            "{}.learning_rate must be finite and > 0, got {}",
            stage,
            self.learning_rate
        );
        Ok(())
    }
}

// ============================================================================
// Rebuild Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RebuildConfig {
    /// Training epochs between checks of the cancellation flag
    pub cancel_check_interval: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            cancel_check_interval: 1,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Log format (json or text)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl IndexConfig {
    /// Load configuration with priority chain:
    /// 1. Environment variables (LEARNED_INDEX__*)
    /// 2. Config file (if provided; a missing file is not an error)
    /// 3. Built-in defaults
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let defaults_json =
            serde_json::to_string(&Self::default()).context("Failed to serialize defaults")?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LEARNED_INDEX")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("Failed to build config")?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.first_stage.validate("first_stage")?;
        self.second_stage.validate("second_stage")?;

        if self.stage_count == 0 {
            return Err(IndexError::InvalidConfig("stage_count must be > 0".to_string()).into());
        }
        anyhow::ensure!(
            self.rebuild.cancel_check_interval > 0,
            "rebuild.cancel_check_interval must be > 0, got {}",
            self.rebuild.cancel_check_interval
        );
        Ok(())
    }

    /// Small, fast configuration used by tests and the demo binary.
    pub fn for_testing(stage_count: usize) -> Self {
        let stage = NetworkParameters {
            batch_size: 32,
            max_epochs: 200,
            learning_rate: 0.01,
            width: 4,
        };
        Self {
            first_stage: stage,
            second_stage: NetworkParameters { width: 0, ..stage },
            stage_count,
            seed: Some(42),
            ..Self::default()
        }
    }
}

/// Generate TOML config with default values.
///
/// # Example
/// ```
/// let text = learned_index_engine::config::generate_example_toml();
/// assert!(text.contains("stage_count"));
/// ```
pub fn generate_example_toml() -> String {
    match toml::to_string_pretty(&IndexConfig::default()) {
        Ok(serialized) => serialized,
        Err(error) => format!("# failed to serialize default config to TOML: {error}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validates() {
        let config = IndexConfig::default();
        config.validate().expect("Default config should be valid");
        assert_eq!(config.stage_count, 100);
        assert_eq!(config.max_overflow_size, 10_000);
        assert_eq!(config.second_stage.width, 0);
    }

    #[test]
    fn test_zero_stage_count_rejected() {
        let mut config = IndexConfig::default();
        config.stage_count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.downcast_ref::<IndexError>().is_some());
    }

    #[test]
    fn test_invalid_network_parameters_rejected() {
        let mut config = IndexConfig::default();
        config.first_stage.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::default();
        config.second_stage.max_epochs = 0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::default();
        config.second_stage.learning_rate = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::default();
        config.first_stage.learning_rate = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_batch_size_caps_to_data() {
        let params = NetworkParameters::default();
        assert_eq!(params.effective_batch_size(10), 10);
        assert_eq!(params.effective_batch_size(1_000), 128);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Info.as_str(), "info");
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "stage_count = 8\nmax_overflow_size = 50\n\n[first_stage]\nwidth = 16\n"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = IndexConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stage_count, 8);
        assert_eq!(config.max_overflow_size, 50);
        assert_eq!(config.first_stage.width, 16);
        // Untouched fields keep their defaults
        assert_eq!(config.first_stage.batch_size, 128);
        assert_eq!(config.max_second_stage_error, DEFAULT_MAX_SECOND_STAGE_ERROR);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "stage_count = 0").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        assert!(IndexConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = IndexConfig::load(None).unwrap();
        assert_eq!(config.first_stage, NetworkParameters::default());
    }

    #[test]
    fn test_example_toml_round_trips() {
        let text = generate_example_toml();
        let parsed: IndexConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, IndexConfig::default());
    }
}
