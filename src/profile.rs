//! Immutable run configuration handed to the governor.

use serde::{Deserialize, Serialize};

use crate::governor::GovernorError;

/// Time unit of `F` words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedrateUnit {
    /// mm/min, the usual G-code convention.
    #[default]
    PerMinute,
    /// mm/s
    PerSecond,
}

impl FeedrateUnit {
    /// Seconds per feedrate time unit.
    pub fn seconds(&self) -> f64 {
        match self {
            FeedrateUnit::PerMinute => 60.0,
            FeedrateUnit::PerSecond => 1.0,
        }
    }

    /// Convert a speed in mm/s into this unit.
    pub fn from_mm_per_s(&self, speed: f64) -> f64 {
        speed * self.seconds()
    }
}

/// Tunables for the windowed smoothing policy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SmoothingParams {
    /// A slowed segment is "isolated" when both neighbours run more than this
    /// many times faster than it.
    pub max_ratio: f64,
    /// Fraction of the neighbours' spare time a short segment may borrow.
    pub borrow_fraction: f64,
    /// Passthrough lines held behind a pending decision before the window is
    /// closed and drained.
    pub max_held_lines: usize,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self { max_ratio: 2.0, borrow_fraction: 0.5, max_held_lines: 256 }
    }
}

/// Printer profile: instruction budget, floor speed and output toggles.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterProfile {
    max_instructions_per_second: f64,
    min_feedrate: f64,
    feedrate_unit: FeedrateUnit,
    feedrate_precision: u32,
    verbose: bool,
    debug_layers: usize,
    smoothing: SmoothingParams,
}

pub const MAX_FEEDRATE_PRECISION: u32 = 6;

impl PrinterProfile {
    /// Profile with default toggles. `min_feedrate` is in feedrate-field units.
    pub fn new(max_instructions_per_second: f64, min_feedrate: f64) -> Result<Self, GovernorError> {
        Self::builder(max_instructions_per_second, min_feedrate).build()
    }

    pub fn builder(max_instructions_per_second: f64, min_feedrate: f64) -> ProfileBuilder {
        ProfileBuilder {
            profile: PrinterProfile {
                max_instructions_per_second,
                min_feedrate,
                feedrate_unit: FeedrateUnit::default(),
                feedrate_precision: 0,
                verbose: false,
                debug_layers: 0,
                smoothing: SmoothingParams::default(),
            },
        }
    }

    pub fn max_instructions_per_second(&self) -> f64 {
        self.max_instructions_per_second
    }

    /// Floor speed in feedrate-field units.
    pub fn min_feedrate(&self) -> f64 {
        self.min_feedrate
    }

    pub fn feedrate_unit(&self) -> FeedrateUnit {
        self.feedrate_unit
    }

    pub fn feedrate_precision(&self) -> u32 {
        self.feedrate_precision
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn debug_layers(&self) -> usize {
        self.debug_layers
    }

    pub fn smoothing(&self) -> &SmoothingParams {
        &self.smoothing
    }

    /// Time the controller needs to take in one instruction, in seconds.
    pub fn min_duration(&self) -> f64 {
        1.0 / self.max_instructions_per_second
    }

    /// Snap a candidate feedrate onto the output grid and into `[floor, commanded]`.
    ///
    /// Rounds down so a quantised feedrate never shortens a segment. A commanded
    /// feedrate already below the floor is returned as-is.
    pub fn settle(&self, candidate: f64, commanded: f64) -> f64 {
        let scale = 10f64.powi(self.feedrate_precision as i32);
        let mut value = ((candidate * scale) + 1e-9).floor() / scale;
        if value < self.min_feedrate {
            value = ((self.min_feedrate * scale) - 1e-9).ceil() / scale;
        }
        // A zero floor must still leave one grid step, `F0` never finishes.
        if value <= 0.0 {
            value = 1.0 / scale;
        }
        value.min(commanded)
    }

    fn validate(&self) -> Result<(), GovernorError> {
        let r = self.max_instructions_per_second;
        if !r.is_finite() || r <= 0.0 {
            return Err(GovernorError::InvalidProfile(format!(
                "max instructions per second must be a positive number, got {}",
                r
            )));
        }
        if !self.min_feedrate.is_finite() || self.min_feedrate < 0.0 {
            return Err(GovernorError::InvalidProfile(format!(
                "minimum print speed must be a non-negative number, got {}",
                self.min_feedrate
            )));
        }
        if self.feedrate_precision > MAX_FEEDRATE_PRECISION {
            return Err(GovernorError::InvalidProfile(format!(
                "feedrate precision must be at most {} decimals",
                MAX_FEEDRATE_PRECISION
            )));
        }
        let s = &self.smoothing;
        if !s.max_ratio.is_finite() || s.max_ratio < 1.0 {
            return Err(GovernorError::InvalidProfile("smoothing max_ratio must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&s.borrow_fraction) {
            return Err(GovernorError::InvalidProfile(
                "smoothing borrow_fraction must be between 0 and 1".to_string(),
            ));
        }
        if s.max_held_lines == 0 {
            return Err(GovernorError::InvalidProfile("smoothing max_held_lines must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`PrinterProfile`]; validation runs once in [`ProfileBuilder::build`].
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    profile: PrinterProfile,
}

impl ProfileBuilder {
    pub fn feedrate_unit(mut self, unit: FeedrateUnit) -> Self {
        self.profile.feedrate_unit = unit;
        self
    }

    pub fn feedrate_precision(mut self, decimals: u32) -> Self {
        self.profile.feedrate_precision = decimals;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.profile.verbose = verbose;
        self
    }

    pub fn debug_layers(mut self, layers: usize) -> Self {
        self.profile.debug_layers = layers;
        self
    }

    pub fn smoothing(mut self, smoothing: SmoothingParams) -> Self {
        self.profile.smoothing = smoothing;
        self
    }

    pub fn build(self) -> Result<PrinterProfile, GovernorError> {
        self.profile.validate()?;
        Ok(self.profile)
    }
}
