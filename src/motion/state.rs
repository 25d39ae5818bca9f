//! Machine state threaded through the governing pass.
//!
//! The state is a plain value: [`MachineState::advance`] takes the current state and
//! one instruction and returns the next state plus the move the instruction made.
//! Nothing here depends on feedrate decisions, so the position track is identical
//! whether or not a line is later rewritten.

use crate::gcode::{CommandKind, Instruction};

/// Absolute toolhead position. `None` until the axis is first defined.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x: Some(x), y: Some(y), z: Some(z), e: Some(e) }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// A move between two positions made by one motion instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub from: Position,
    pub to: Position,
    /// Source-file modal feedrate in effect for this move.
    pub feedrate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MachineState {
    pub position: Position,
    /// G91 in effect.
    pub relative_xyz: bool,
    /// M83 in effect (G91 also makes E relative).
    pub relative_e: bool,
    /// Last feedrate commanded by the source file.
    pub modal_feedrate: Option<f64>,
    /// Incremented on each layer-boundary line; 0 is the preamble.
    pub layer: usize,
}

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State with a known starting position, e.g. after homing.
    pub fn at(position: Position) -> Self {
        Self { position, ..Self::default() }
    }

    /// Apply one instruction. Returns the next state and, for instructions that
    /// move the head, the move they make.
    pub fn advance(self, instruction: &Instruction) -> (MachineState, Option<Move>) {
        let mut next = self;
        if instruction.layer_boundary {
            next.layer += 1;
        }
        if instruction.uses_feedrate() {
            if let Some(f) = instruction.feedrate {
                next.modal_feedrate = Some(f);
            }
        }

        let axes = &instruction.axes;
        match instruction.kind {
            CommandKind::Rapid | CommandKind::Linear | CommandKind::Arc => {
                let rel_e = self.relative_e || self.relative_xyz;
                let to = Position {
                    x: resolve(self.position.x, axes.x, self.relative_xyz),
                    y: resolve(self.position.y, axes.y, self.relative_xyz),
                    z: resolve(self.position.z, axes.z, self.relative_xyz),
                    e: resolve(self.position.e, axes.e, rel_e),
                };
                next.position = to;
                let mv = Move { from: self.position, to, feedrate: next.modal_feedrate };
                return (next, Some(mv));
            }
            CommandKind::Home => {
                let all = axes.x.is_none() && axes.y.is_none() && axes.z.is_none();
                if all || axes.x.is_some() {
                    next.position.x = Some(0.0);
                }
                if all || axes.y.is_some() {
                    next.position.y = Some(0.0);
                }
                if all || axes.z.is_some() {
                    next.position.z = Some(0.0);
                }
            }
            CommandKind::SetPosition => {
                if axes.is_empty() {
                    next.position = Position::origin();
                } else {
                    next.position.x = axes.x.or(next.position.x);
                    next.position.y = axes.y.or(next.position.y);
                    next.position.z = axes.z.or(next.position.z);
                    next.position.e = axes.e.or(next.position.e);
                }
            }
            CommandKind::AbsolutePositioning => {
                next.relative_xyz = false;
                next.relative_e = false;
            }
            CommandKind::RelativePositioning => next.relative_xyz = true,
            CommandKind::ExtruderAbsolute => next.relative_e = false,
            CommandKind::ExtruderRelative => next.relative_e = true,
            CommandKind::Other(_) | CommandKind::Empty | CommandKind::Unrecognized => {}
        }
        (next, None)
    }
}

fn resolve(current: Option<f64>, word: Option<f64>, relative: bool) -> Option<f64> {
    match (word, relative) {
        (None, _) => current,
        (Some(v), false) => Some(v),
        (Some(v), true) => current.map(|c| c + v),
    }
}
