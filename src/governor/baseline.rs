//! Single-segment rule: slow a move just enough to fill the instruction budget,
//! but never below the floor speed.

use super::{Decision, DecisionWindow, FeedratePolicy};
use crate::motion::SegmentTiming;
use crate::profile::PrinterProfile;

/// Baseline decision for one move, judged in isolation.
///
/// When the floor speed is higher than the required feedrate the move still runs
/// faster than the budget allows. That residual stall is kept visible through
/// [`Decision::floor_limited`] and [`Decision::is_sub_budget`].
pub fn decide(timing: SegmentTiming, profile: &PrinterProfile) -> Decision {
    let commanded = timing.commanded_feedrate;
    match timing.required_feedrate {
        None => Decision::new(timing, commanded, false),
        Some(required) => {
            let floor = profile.min_feedrate();
            let emitted = profile.settle(required.max(floor), commanded);
            // Rounding the floor up to the output grid can overshoot `required` too.
            Decision::new(timing, emitted, timing.under_budget_at(emitted))
        }
    }
}

/// Policy that leaves the baseline decision untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselinePolicy;

impl FeedratePolicy for BaselinePolicy {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn reach(&self) -> usize {
        0
    }

    fn refine(&self, _window: DecisionWindow<'_>, _profile: &PrinterProfile) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{Move, Position, measure};
    use crate::profile::FeedrateUnit;

    fn timing(distance: f64, feedrate: f64, profile: &PrinterProfile) -> SegmentTiming {
        let mv = Move {
            from: Position::origin(),
            to: Position::new(distance, 0.0, 0.0, 0.0),
            feedrate: Some(feedrate),
        };
        measure(1, &mv, profile).unwrap().unwrap()
    }

    fn per_second() -> PrinterProfile {
        PrinterProfile::builder(50.0, 10.0).feedrate_unit(FeedrateUnit::PerSecond).build().unwrap()
    }

    #[test]
    fn test_one_millimetre_at_6000() {
        let profile = per_second();
        let d = decide(timing(1.0, 6000.0, &profile), &profile);
        assert_eq!(d.emitted_feedrate, 50.0);
        assert!(d.is_modified());
        assert!(!d.floor_limited);
        assert!(!d.is_sub_budget());
    }

    #[test]
    fn test_tiny_segment_clamps_to_floor() {
        let profile = per_second();
        let d = decide(timing(0.05, 6000.0, &profile), &profile);
        assert_eq!(d.emitted_feedrate, 10.0);
        assert!(d.floor_limited);
        assert!(d.is_sub_budget());
        assert!((d.emitted_duration() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_long_segment_unchanged() {
        let profile = per_second();
        let d = decide(timing(10.0, 100.0, &profile), &profile);
        assert_eq!(d.emitted_feedrate, 100.0);
        assert!(!d.is_modified());
        assert_eq!(d.added_time(), 0.0);
    }

    #[test]
    fn test_commanded_below_floor_not_raised() {
        let profile = per_second();
        // 0.1 mm at 8 mm/s is 12.5 ms, under the 20 ms budget.
        let d = decide(timing(0.1, 8.0, &profile), &profile);
        assert_eq!(d.emitted_feedrate, 8.0);
        assert!(!d.is_modified());
        assert!(d.floor_limited);
    }

    #[test]
    fn test_quantised_floor_counts_as_floor_limited() {
        // Floor 12.3 rounds up to 13 on a whole-number grid, above the 12.5 needed.
        let profile = PrinterProfile::builder(50.0, 12.3).feedrate_unit(FeedrateUnit::PerSecond).build().unwrap();
        let d = decide(timing(0.25, 6000.0, &profile), &profile);
        assert_eq!(d.emitted_feedrate, 13.0);
        assert!(d.floor_limited);
        assert!(d.is_sub_budget());
    }

    #[test]
    fn test_exactly_on_budget_is_left_alone() {
        let profile = per_second();
        let d = decide(timing(1.0, 50.0, &profile), &profile);
        assert!(!d.is_modified());
    }
}
