//! Segment geometry and timing.
//!
//! Pure functions: given where the head was, where an instruction sends it and the
//! feedrate it runs at, work out how long the move takes and whether that is less
//! than the controller's per-instruction budget.

use serde::Serialize;

use super::state::{Move, Position};
use crate::governor::GovernorError;
use crate::profile::PrinterProfile;

/// Relative tolerance used when comparing a duration against the budget.
const BUDGET_TOLERANCE: f64 = 1e-9;

/// Timing of one eligible segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentTiming {
    /// Euclidean XYZ travel, mm.
    pub distance: f64,
    /// E travel, mm. Does not contribute to `distance`.
    pub extrusion: f64,
    /// Feedrate the source file runs this segment at, F units.
    pub commanded_feedrate: f64,
    /// Seconds at the commanded feedrate.
    pub nominal_duration: f64,
    /// Seconds the controller needs per instruction (1 / R).
    pub min_duration: f64,
    /// Feedrate that makes the segment last exactly `min_duration`, when it is
    /// currently shorter than that.
    pub required_feedrate: Option<f64>,
    /// Seconds per feedrate time unit.
    pub time_base: f64,
}

impl SegmentTiming {
    /// Seconds the segment takes at `feedrate`.
    pub fn duration_at(&self, feedrate: f64) -> f64 {
        self.distance / feedrate * self.time_base
    }

    /// Feedrate that makes the segment last `duration` seconds.
    pub fn feedrate_for(&self, duration: f64) -> f64 {
        self.distance / duration * self.time_base
    }

    /// Whether a segment run at `feedrate` finishes before the controller can take
    /// in the next instruction.
    pub fn under_budget_at(&self, feedrate: f64) -> bool {
        is_under_budget(self.duration_at(feedrate), self.min_duration)
    }
}

fn is_under_budget(duration: f64, min_duration: f64) -> bool {
    duration < min_duration * (1.0 - BUDGET_TOLERANCE)
}

/// XYZ displacement of a move. `None` when a changed axis has no known start.
pub fn spatial_distance(from: &Position, to: &Position) -> Option<f64> {
    let mut sum = 0.0;
    for (a, b) in [(from.x, to.x), (from.y, to.y), (from.z, to.z)] {
        match (a, b) {
            (Some(a), Some(b)) => sum += (b - a) * (b - a),
            (None, None) => {}
            _ => return None,
        }
    }
    Some(sum.sqrt())
}

fn extrusion_delta(from: &Position, to: &Position) -> f64 {
    match (from.e, to.e) {
        (Some(a), Some(b)) => b - a,
        _ => 0.0,
    }
}

/// Measure a move against the instruction budget.
///
/// Returns `Ok(None)` for moves that are not eligible for governing (no XYZ travel,
/// or travel from an unknown position) and `Err(DegenerateSegment)` when the move
/// has length but no usable feedrate.
pub fn measure(
    line: usize,
    mv: &Move,
    profile: &PrinterProfile,
) -> Result<Option<SegmentTiming>, GovernorError> {
    let Some(distance) = spatial_distance(&mv.from, &mv.to) else {
        return Ok(None);
    };
    if distance <= 0.0 {
        return Ok(None);
    }
    let feedrate = match mv.feedrate {
        Some(f) if f > 0.0 && f.is_finite() => f,
        other => {
            return Err(GovernorError::DegenerateSegment { line, distance, feedrate: other });
        }
    };

    let time_base = profile.feedrate_unit().seconds();
    let min_duration = profile.min_duration();
    let nominal_duration = distance / feedrate * time_base;
    let required_feedrate = is_under_budget(nominal_duration, min_duration)
        .then(|| distance * profile.max_instructions_per_second() * time_base);

    Ok(Some(SegmentTiming {
        distance,
        extrusion: extrusion_delta(&mv.from, &mv.to),
        commanded_feedrate: feedrate,
        nominal_duration,
        min_duration,
        required_feedrate,
        time_base,
    }))
}
