use krusty_governor::gcode::Instruction;
use krusty_governor::{FeedrateUnit, Governed, Governor, PolicyKind, PrinterProfile, SmoothingParams};
use proptest::prelude::*;

// Relative moves of random length, some carrying a new feedrate.
prop_compose! {
    fn moves_strategy()(
        moves in prop::collection::vec((0.001f64..20.0, prop::option::of(1.0f64..12000.0)), 1..120)
    ) -> Vec<String> {
        let mut lines = vec!["G28".to_string(), "G91".to_string(), "G1 X0.1 F3000".to_string()];
        for (len, feed) in moves {
            match feed {
                Some(f) => lines.push(format!("G1 X{:.3} F{:.1}", len, f)),
                None => lines.push(format!("G1 X{:.3}", len)),
            }
        }
        lines
    }
}

fn govern(lines: &[String], profile: &PrinterProfile, kind: PolicyKind) -> Vec<Governed> {
    let instructions = lines.iter().enumerate().map(|(i, l)| Instruction::parse(i + 1, l));
    Governor::govern_all(profile.clone(), kind.build(), instructions)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn feedrates_stay_in_bounds(
        lines in moves_strategy(),
        rate in 10.0f64..500.0,
        floor in 0.0f64..50.0,
        max_ratio in 1.0f64..5.0,
        borrow_fraction in 0.0f64..=1.0,
    ) {
        let profile = PrinterProfile::builder(rate, floor)
            .feedrate_unit(FeedrateUnit::PerSecond)
            .smoothing(SmoothingParams { max_ratio, borrow_fraction, ..Default::default() })
            .build()
            .unwrap();
        for kind in [PolicyKind::Baseline, PolicyKind::Windowed] {
            let out = govern(&lines, &profile, kind);
            prop_assert_eq!(out.len(), lines.len());
            for (g, line) in out.iter().zip(&lines) {
                prop_assert_eq!(&g.instruction.raw, line);
                if let Some(d) = g.decision() {
                    prop_assert!(d.emitted_feedrate <= d.commanded());
                    prop_assert!(d.emitted_feedrate >= floor.min(d.commanded()));
                }
            }
        }
    }

    #[test]
    fn baseline_only_leaves_floor_limited_moves_under_budget(lines in moves_strategy(), floor in 0.0f64..50.0) {
        let profile = PrinterProfile::builder(50.0, floor)
            .feedrate_unit(FeedrateUnit::PerSecond)
            .build()
            .unwrap();
        for g in govern(&lines, &profile, PolicyKind::Baseline) {
            if let Some(d) = g.decision() {
                prop_assert!(!d.is_sub_budget() || d.floor_limited);
            }
        }
    }

    #[test]
    fn policies_agree_on_final_position(lines in moves_strategy()) {
        let profile = PrinterProfile::builder(50.0, 10.0)
            .feedrate_unit(FeedrateUnit::PerSecond)
            .build()
            .unwrap();
        let mut positions = Vec::new();
        for kind in [PolicyKind::Baseline, PolicyKind::Windowed] {
            let mut governor = Governor::new(profile.clone(), kind.build());
            governor.push_batch(lines.iter().enumerate().map(|(i, l)| Instruction::parse(i + 1, l)));
            governor.finish();
            positions.push(governor.state().position);
        }
        prop_assert_eq!(positions[0], positions[1]);
    }
}
