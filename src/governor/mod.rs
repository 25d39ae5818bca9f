//! Feedrate governor.
//!
//! Decides, per eligible move, the feedrate to emit so the move lasts at least as
//! long as the controller needs to take in the next instruction. The decision rule
//! is a [`FeedratePolicy`]; the governor owns the machine state and a small queue
//! of lines whose decisions may still change.
//!
//! Queue discipline: a policy with reach 1 sees the previous and next eligible
//! decision around its focus. The focus is refined once the next eligible move
//! has arrived, and a decision is released (never to change again) once the
//! window has moved past it. Passthrough lines are queued behind pending
//! decisions to keep stream order.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gcode::Instruction;
use crate::motion::{MachineState, SegmentTiming, measure};
use crate::profile::PrinterProfile;

pub mod baseline;
pub mod windowed;

pub use baseline::BaselinePolicy;
pub use windowed::WindowedPolicy;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernorError {
    #[error("Invalid printer profile: {0}")]
    InvalidProfile(String),
    #[error("Degenerate segment on line {line}: {distance:.4} mm move with feedrate {feedrate:?}")]
    DegenerateSegment { line: usize, distance: f64, feedrate: Option<f64> },
}

/// Feedrate decision for one eligible move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub timing: SegmentTiming,
    /// What the single-segment rule alone would emit.
    pub baseline_feedrate: f64,
    pub emitted_feedrate: f64,
    /// The floor speed stopped the move from reaching the instruction budget.
    pub floor_limited: bool,
    /// Seconds of neighbouring spare time this move was allowed to use.
    pub borrowed: f64,
    /// Slowed down to smooth the transition into a neighbouring short move.
    pub eased: bool,
    #[serde(skip)]
    lent: f64,
}

impl Decision {
    pub fn new(timing: SegmentTiming, emitted_feedrate: f64, floor_limited: bool) -> Self {
        Self {
            timing,
            baseline_feedrate: emitted_feedrate,
            emitted_feedrate,
            floor_limited,
            borrowed: 0.0,
            eased: false,
            lent: 0.0,
        }
    }

    pub fn commanded(&self) -> f64 {
        self.timing.commanded_feedrate
    }

    /// The emitted feedrate differs from the commanded one.
    pub fn is_modified(&self) -> bool {
        self.emitted_feedrate < self.commanded()
    }

    pub fn emitted_duration(&self) -> f64 {
        self.timing.duration_at(self.emitted_feedrate)
    }

    /// Print time added by slowing this move, seconds.
    pub fn added_time(&self) -> f64 {
        self.emitted_duration() - self.timing.nominal_duration
    }

    /// Still finishes before the controller's per-instruction budget.
    pub fn is_sub_budget(&self) -> bool {
        self.timing.under_budget_at(self.emitted_feedrate)
    }

    pub fn is_smoothed(&self) -> bool {
        self.borrowed > 0.0 || self.eased
    }

    /// Time beyond the instruction budget not yet lent to a neighbour, seconds.
    pub fn spare_time(&self) -> f64 {
        ((self.emitted_duration() - self.timing.min_duration).max(0.0) - self.lent).max(0.0)
    }

    /// Record `seconds` of this move's spare time as used by a neighbour.
    pub fn lend(&mut self, seconds: f64) {
        self.lent += seconds;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not an eligible move; emitted verbatim.
    Passthrough,
    /// Move with length but no usable feedrate; emitted verbatim.
    Degenerate(GovernorError),
    Governed(Decision),
}

/// An instruction together with the governor's final word on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Governed {
    pub instruction: Instruction,
    /// Layer the instruction belongs to.
    pub layer: usize,
    /// Source-file modal feedrate after this instruction.
    pub modal_feedrate: Option<f64>,
    pub outcome: Outcome,
}

impl Governed {
    pub fn decision(&self) -> Option<&Decision> {
        match &self.outcome {
            Outcome::Governed(d) => Some(d),
            _ => None,
        }
    }

    fn decision_mut(&mut self) -> Option<&mut Decision> {
        match &mut self.outcome {
            Outcome::Governed(d) => Some(d),
            _ => None,
        }
    }
}

/// Mutable view of the focus decision and its immediate eligible neighbours.
pub struct DecisionWindow<'a> {
    pub previous: Option<&'a mut Decision>,
    pub focus: &'a mut Decision,
    pub next: Option<&'a mut Decision>,
}

/// Decision rule applied on top of the single-segment baseline.
pub trait FeedratePolicy: Send {
    fn name(&self) -> &'static str;

    /// Eligible neighbours on each side the policy inspects or changes (0 or 1).
    fn reach(&self) -> usize;

    /// Adjust the focus decision, and optionally its neighbours, in place.
    fn refine(&self, window: DecisionWindow<'_>, profile: &PrinterProfile);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Each move judged in isolation.
    Baseline,
    /// Short moves between long ones are smoothed across their neighbours.
    #[default]
    Windowed,
}

impl PolicyKind {
    pub fn build(&self) -> Box<dyn FeedratePolicy> {
        match self {
            PolicyKind::Baseline => Box::new(BaselinePolicy),
            PolicyKind::Windowed => Box::new(WindowedPolicy),
        }
    }
}

/// Classify one instruction against the current state.
///
/// Returns the next state and the instruction with its baseline outcome. This is
/// the whole per-line step apart from policy refinement.
pub fn step(state: MachineState, instruction: Instruction, profile: &PrinterProfile) -> (MachineState, Governed) {
    let (next, mv) = state.advance(&instruction);
    let outcome = match mv {
        Some(mv) if instruction.is_move() && !instruction.checksummed => {
            match measure(instruction.line_number, &mv, profile) {
                Ok(Some(timing)) => Outcome::Governed(baseline::decide(timing, profile)),
                Ok(None) => Outcome::Passthrough,
                Err(e) => Outcome::Degenerate(e),
            }
        }
        _ => Outcome::Passthrough,
    };
    let governed = Governed { instruction, layer: next.layer, modal_feedrate: next.modal_feedrate, outcome };
    (next, governed)
}

struct Held {
    governed: Governed,
    refined: bool,
}

pub struct Governor {
    profile: PrinterProfile,
    policy: Box<dyn FeedratePolicy>,
    state: MachineState,
    held: VecDeque<Held>,
}

impl Governor {
    pub fn new(profile: PrinterProfile, policy: Box<dyn FeedratePolicy>) -> Self {
        Self { profile, policy, state: MachineState::new(), held: VecDeque::new() }
    }

    /// Start from a known machine state instead of an unknown position.
    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn profile(&self) -> &PrinterProfile {
        &self.profile
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Number of lines waiting on a decision.
    pub fn pending(&self) -> usize {
        self.held.len()
    }

    /// Feed one instruction. Returns every line that became final, in stream order.
    pub fn push(&mut self, instruction: Instruction) -> Vec<Governed> {
        let (next, governed) = step(self.state, instruction, &self.profile);
        self.state = next;
        let eligible = governed.decision().is_some();
        self.held.push_back(Held { governed, refined: false });

        if eligible {
            self.refine_ready();
        } else if self.held_passthrough() > self.profile.smoothing().max_held_lines {
            tracing::debug!(
                "closing decision window at line {}: too many held lines",
                self.state_line()
            );
            return self.close();
        }
        self.release()
    }

    /// Feed a batch of instructions, e.g. one layer.
    pub fn push_batch<I>(&mut self, batch: I) -> Vec<Governed>
    where
        I: IntoIterator<Item = Instruction>,
    {
        let mut out = Vec::new();
        for instruction in batch {
            out.extend(self.push(instruction));
        }
        out
    }

    /// End of stream: settle every pending decision and release everything.
    pub fn finish(&mut self) -> Vec<Governed> {
        self.close()
    }

    /// Run a whole instruction sequence through a fresh governor.
    pub fn govern_all<I>(profile: PrinterProfile, policy: Box<dyn FeedratePolicy>, instructions: I) -> Vec<Governed>
    where
        I: IntoIterator<Item = Instruction>,
    {
        let mut governor = Governor::new(profile, policy);
        let mut out = governor.push_batch(instructions);
        out.extend(governor.finish());
        out
    }

    fn reach(&self) -> usize {
        self.policy.reach().min(1)
    }

    fn state_line(&self) -> usize {
        self.held.back().map(|h| h.governed.instruction.line_number).unwrap_or(0)
    }

    fn eligible_positions(&self) -> Vec<usize> {
        self.held
            .iter()
            .enumerate()
            .filter(|(_, h)| h.governed.decision().is_some())
            .map(|(i, _)| i)
            .collect()
    }

    fn held_passthrough(&self) -> usize {
        self.held.iter().filter(|h| h.governed.decision().is_none()).count()
    }

    /// Refine every pending decision that has enough eligible moves after it.
    fn refine_ready(&mut self) {
        let reach = self.reach();
        let eligible = self.eligible_positions();
        for k in 0..eligible.len() {
            if self.held[eligible[k]].refined {
                continue;
            }
            if eligible.len() - 1 - k < reach {
                break;
            }
            self.refine_at(&eligible, k);
        }
    }

    fn refine_at(&mut self, eligible: &[usize], k: usize) {
        let reach = self.reach();
        let previous = (reach > 0 && k > 0).then(|| eligible[k - 1]);
        let next = (reach > 0 && k + 1 < eligible.len()).then(|| eligible[k + 1]);
        let focus = eligible[k];

        let slice = self.held.make_contiguous();
        if let Some(window) = window_at(slice, previous, focus, next) {
            self.policy.refine(window, &self.profile);
        }
        slice[focus].refined = true;
    }

    /// Drain the lines no future refinement can touch.
    fn release(&mut self) -> Vec<Governed> {
        let eligible = self.eligible_positions();
        let first_open = eligible
            .iter()
            .position(|&i| !self.held[i].refined)
            .unwrap_or(eligible.len());
        let keep_from = first_open.saturating_sub(self.reach());
        let cut = eligible.get(keep_from).copied().unwrap_or(self.held.len());
        self.held.drain(..cut).map(|h| h.governed).collect()
    }

    /// Refine what is left without waiting for more input, then drain it all.
    fn close(&mut self) -> Vec<Governed> {
        let eligible = self.eligible_positions();
        for k in 0..eligible.len() {
            if !self.held[eligible[k]].refined {
                self.refine_at(&eligible, k);
            }
        }
        self.held.drain(..).map(|h| h.governed).collect()
    }
}

fn window_at(
    slice: &mut [Held],
    previous: Option<usize>,
    focus: usize,
    next: Option<usize>,
) -> Option<DecisionWindow<'_>> {
    let (left, right) = slice.split_at_mut(focus);
    let (mid, right) = right.split_at_mut(1);
    let previous = match previous {
        Some(i) => left[i].governed.decision_mut(),
        None => None,
    };
    let next = match next {
        Some(i) => right[i - focus - 1].governed.decision_mut(),
        None => None,
    };
    let focus = mid[0].governed.decision_mut()?;
    Some(DecisionWindow { previous, focus, next })
}
