// src/motion/mod.rs - Position tracking and segment timing

pub mod segment;
pub mod state;

pub use segment::{SegmentTiming, measure, spatial_distance};
pub use state::{MachineState, Move, Position};
