//! # Governor Configuration
//!
//! TOML file with a `[governor]` table (instruction budget, floor speed, policy) and an
//! `[output]` table (annotations and diagnostics). Every field has a default, so an
//! empty file is valid.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [governor]
//! max_instructions_per_second = 50.0
//! min_print_speed = 10.0
//! policy = "windowed"
//!
//! [governor.smoothing]
//! max_ratio = 2.0
//! borrow_fraction = 0.5
//!
//! [output]
//! verbose = true
//! debug_layers = 3
//! ```
//!
//! `min_print_speed` is in mm/s whatever `feedrate_unit` says; [`Config::to_profile`]
//! converts it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::governor::{GovernorError, PolicyKind};
use crate::pipeline::PipelineOptions;
use crate::profile::{FeedrateUnit, PrinterProfile, SmoothingParams};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    InvalidProfile(#[from] GovernorError),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Budget and decision rule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GovernorConfig {
    #[serde(default = "default_max_instructions_per_second")]
    pub max_instructions_per_second: f64,
    /// Floor speed, mm/s.
    #[serde(default = "default_min_print_speed")]
    pub min_print_speed: f64,
    #[serde(default)]
    pub feedrate_unit: FeedrateUnit,
    #[serde(default)]
    pub feedrate_precision: u32,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default)]
    pub smoothing: SmoothingParams,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_instructions_per_second: default_max_instructions_per_second(),
            min_print_speed: default_min_print_speed(),
            feedrate_unit: FeedrateUnit::default(),
            feedrate_precision: 0,
            policy: PolicyKind::default(),
            smoothing: SmoothingParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub debug_layers: usize,
    #[serde(default = "default_layer_marker")]
    pub layer_marker: String,
    #[serde(default = "default_true")]
    pub annotate: bool,
    #[serde(default = "default_true")]
    pub adjust_time_elapsed: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            debug_layers: 0,
            layer_marker: default_layer_marker(),
            annotate: true,
            adjust_time_elapsed: true,
        }
    }
}

impl Config {
    /// Validate and build the immutable profile for a run.
    pub fn to_profile(&self) -> Result<PrinterProfile, ConfigError> {
        let g = &self.governor;
        let profile = PrinterProfile::builder(
            g.max_instructions_per_second,
            g.feedrate_unit.from_mm_per_s(g.min_print_speed),
        )
        .feedrate_unit(g.feedrate_unit)
        .feedrate_precision(g.feedrate_precision)
        .smoothing(g.smoothing)
        .verbose(self.output.verbose)
        .debug_layers(self.output.debug_layers)
        .build()?;
        Ok(profile)
    }
}

impl OutputConfig {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            layer_marker: self.layer_marker.clone(),
            annotate: self.annotate,
            adjust_time_elapsed: self.adjust_time_elapsed,
        }
    }
}

// Default value functions
fn default_max_instructions_per_second() -> f64 { 50.0 }
fn default_min_print_speed() -> f64 { 10.0 }
fn default_layer_marker() -> String { ";LAYER:".to_string() }
fn default_true() -> bool { true }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
