// Interpreter configuration - one JSON document for every stage
// Missing sections fall back to their defaults; validate() rejects out-of-range values

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::analysis::AnalyzerConfig;
use crate::conductor::ConductorConfig;
use crate::curves::CurveConfig;
use crate::rules::{ExpressionStrengths, RuleManager, RulesConfig, ValidationConfig, DEFAULT_TIMING_RANGE_BEATS};

/// Seed of the run's random generator when none is configured
pub const DEFAULT_SEED: u64 = 42;

/// Errors while loading or checking a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("`{name}` = {value} is out of range {min}..={max}")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Unknown {role} rule `{name}`")]
    UnknownRule { role: String, name: String },
}

/// Complete interpreter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub strengths: ExpressionStrengths,

    /// Timing window in beats at full rubato
    pub timing_range_beats: f64,

    /// Seed of the run's random generator
    pub seed: u64,

    pub analyzer: AnalyzerConfig,
    pub rules: RulesConfig,
    pub validation: ValidationConfig,
    pub conductor: ConductorConfig,
    pub curves: CurveConfig,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            strengths: ExpressionStrengths::default(),
            timing_range_beats: DEFAULT_TIMING_RANGE_BEATS,
            seed: DEFAULT_SEED,
            analyzer: AnalyzerConfig::default(),
            rules: RulesConfig::default(),
            validation: ValidationConfig::default(),
            conductor: ConductorConfig::default(),
            curves: CurveConfig::default(),
        }
    }
}

impl InterpreterConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: InterpreterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and rule names
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.strengths.named() {
            check_range(name, value, 0.0, 1.0)?;
        }
        if let Some(strength) = self.conductor.wave_strength {
            check_range("conductor.wave_strength", strength, 0.0, 1.0)?;
        }
        check_range("conductor.wave_complexity", self.conductor.wave_complexity, 0.0, 1.0)?;
        check_positive("conductor.base_frequency", self.conductor.base_frequency)?;
        check_positive("timing_range_beats", self.timing_range_beats)?;
        check_positive("curves.resolution_beats", self.curves.resolution_beats)?;
        check_positive("analyzer.phrase_gap_beats", self.analyzer.phrase_gap_beats)?;
        if self.curves.controller > 127 {
            return Err(ConfigError::OutOfRange {
                name: "curves.controller".to_string(),
                value: self.curves.controller as f64,
                min: 0.0,
                max: 127.0,
            });
        }

        // Builds the rule sets once to reject unknown rule names early
        RuleManager::from_config(&self.rules)?;
        Ok(())
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value,
            min,
            max,
        })
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value,
            min: f64::MIN_POSITIVE,
            max: f64::MAX,
        })
    }
}

/// Load and validate configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<InterpreterConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = InterpreterConfig::from_json_str(&content)?;
    log::info!("Loaded interpreter configuration from {}", path.display());
    Ok(config)
}

/// Save configuration as pretty JSON
pub fn save_config<P: AsRef<Path>>(config: &InterpreterConfig, path: P) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
