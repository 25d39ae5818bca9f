//! Windowed smoothing.
//!
//! The baseline rule slows each short move on its own, so a single short move
//! between two long ones produces a sharp dip in speed and back. This policy looks
//! at the previous and next eligible move. When the focus has been slowed and both
//! neighbours run more than `max_ratio` times faster, it:
//!
//! 1. lets the focus use part of the neighbours' spare time (the time they take
//!    beyond the instruction budget), which raises the focus feedrate, then
//! 2. eases any neighbour still faster than `focus * max_ratio` down to that
//!    ceiling.
//!
//! Feedrates stay inside `[floor, commanded]` for every move touched.

use super::{DecisionWindow, FeedratePolicy};
use crate::profile::PrinterProfile;

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedPolicy;

impl FeedratePolicy for WindowedPolicy {
    fn name(&self) -> &'static str {
        "windowed"
    }

    fn reach(&self) -> usize {
        1
    }

    fn refine(&self, window: DecisionWindow<'_>, profile: &PrinterProfile) {
        let DecisionWindow { previous, focus, next } = window;
        let (Some(previous), Some(next)) = (previous, next) else {
            return;
        };
        if !focus.is_modified() {
            return;
        }
        let params = profile.smoothing();
        let ratio = params.max_ratio;
        let isolated = focus.emitted_feedrate * ratio < previous.emitted_feedrate
            && focus.emitted_feedrate * ratio < next.emitted_feedrate;
        if !isolated {
            return;
        }

        let spare_previous = previous.spare_time();
        let spare_next = next.spare_time();
        let spare = spare_previous + spare_next;
        let current = focus.emitted_duration();
        let wanted = (params.borrow_fraction * spare).min(current - focus.timing.nominal_duration);
        if wanted > 0.0 {
            let candidate = focus.timing.feedrate_for(current - wanted);
            let emitted = profile.settle(candidate, focus.commanded());
            if emitted > focus.emitted_feedrate {
                let borrowed = current - focus.timing.duration_at(emitted);
                focus.emitted_feedrate = emitted;
                focus.borrowed += borrowed;
                previous.lend(borrowed * spare_previous / spare);
                next.lend(borrowed * spare_next / spare);
                tracing::trace!(
                    "smoothing: borrowed {:.6}s, feedrate {} -> {}",
                    borrowed,
                    focus.baseline_feedrate,
                    emitted
                );
            }
        }

        if !focus.is_modified() {
            return;
        }
        let ceiling = focus.emitted_feedrate * ratio;
        for neighbour in [previous, next] {
            if neighbour.emitted_feedrate > ceiling {
                let eased = profile.settle(ceiling, neighbour.commanded());
                if eased < neighbour.emitted_feedrate {
                    neighbour.emitted_feedrate = eased;
                    neighbour.eased = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::{BaselinePolicy, Governed, Governor, PolicyKind};
    use crate::gcode::Instruction;
    use crate::profile::{FeedrateUnit, SmoothingParams};

    fn profile(params: SmoothingParams) -> PrinterProfile {
        PrinterProfile::builder(50.0, 10.0)
            .feedrate_unit(FeedrateUnit::PerSecond)
            .smoothing(params)
            .build()
            .unwrap()
    }

    fn emitted(out: &[Governed]) -> Vec<f64> {
        out.iter().filter_map(|g| g.decision()).map(|d| d.emitted_feedrate).collect()
    }

    fn run(kind: PolicyKind, params: SmoothingParams, src: &[&str]) -> Vec<f64> {
        let instructions = src.iter().enumerate().map(|(i, l)| Instruction::parse(i + 1, l));
        emitted(&Governor::govern_all(profile(params), kind.build(), instructions))
    }

    // Neighbours sit exactly on the budget (2 mm at 100 mm/s = 20 ms), so there is
    // no spare time to borrow and smoothing has to ease them.
    const TIGHT: [&str; 5] = ["G28", "G1 X2 F100", "G1 X4", "G1 X4.2", "G1 X6.2"];

    // Neighbours are long (10 mm at 100 mm/s = 100 ms) with plenty of spare time.
    const ROOMY: [&str; 5] = ["G28", "G1 X10 F100", "G1 X20", "G1 X20.5", "G1 X30.5"];

    #[test]
    fn test_baseline_dips_sharply() {
        assert_eq!(run(PolicyKind::Baseline, SmoothingParams::default(), &TIGHT), vec![100.0, 100.0, 10.0, 100.0]);
    }

    #[test]
    fn test_eases_neighbours_without_spare_time() {
        let out = run(PolicyKind::Windowed, SmoothingParams::default(), &TIGHT);
        assert_eq!(out, vec![100.0, 20.0, 10.0, 20.0]);
    }

    #[test]
    fn test_borrows_spare_time() {
        let out = run(PolicyKind::Windowed, SmoothingParams::default(), &ROOMY);
        let naive = run(PolicyKind::Baseline, SmoothingParams::default(), &ROOMY);
        assert_eq!(naive[2], 25.0);
        assert!(out[2] > naive[2]);
        assert!(out[2] <= 100.0);
        assert!((out[1] - out[2]).abs() < (naive[1] - naive[2]).abs());
        assert!((out[3] - out[2]).abs() < (naive[3] - naive[2]).abs());
    }

    #[test]
    fn test_no_borrowing_when_fraction_zero() {
        let params = SmoothingParams { borrow_fraction: 0.0, ..Default::default() };
        let out = run(PolicyKind::Windowed, params, &ROOMY);
        assert_eq!(out, vec![100.0, 50.0, 25.0, 50.0]);
    }

    #[test]
    fn test_moderate_dip_left_alone() {
        let params = SmoothingParams { max_ratio: 20.0, ..Default::default() };
        let out = run(PolicyKind::Windowed, params, &TIGHT);
        assert_eq!(out, vec![100.0, 100.0, 10.0, 100.0]);
    }

    #[test]
    fn test_needs_both_neighbours() {
        let src = ["G28", "G1 X10 F100", "G1 X10.2"];
        let out = run(PolicyKind::Windowed, SmoothingParams::default(), &src);
        assert_eq!(out, vec![100.0, 10.0]);
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(WindowedPolicy.name(), "windowed");
        assert_eq!(BaselinePolicy.name(), "baseline");
    }
}
