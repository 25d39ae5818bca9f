//! G-code feedrate governor.
//!
//! Slows down moves too short for the printer controller to keep up with, so the
//! controller never runs out of buffered instructions mid-print.

pub mod config;
pub mod diagnostics;
pub mod gcode;
pub mod governor;
pub mod motion;
pub mod pipeline;
pub mod profile;
pub mod rewriter;

pub use config::{Config, ConfigError, load_config};
pub use diagnostics::{DiagnosticRecord, DiagnosticsEmitter, RunSummary};
pub use governor::{Decision, FeedratePolicy, Governed, Governor, GovernorError, Outcome, PolicyKind};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, process_str, run};
pub use profile::{FeedrateUnit, PrinterProfile, SmoothingParams};
