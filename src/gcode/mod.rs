// src/gcode/mod.rs
pub mod instruction;
pub mod parser;

pub use instruction::{AxisWords, CommandKind, Instruction, LineEnding, TIME_ELAPSED};
pub use parser::{GCodeError, GCodeParser, GCodeSpan, GCodeToken};
