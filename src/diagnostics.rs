//! Diagnostics: per-modification records for the first few layers and a run summary.
//!
//! Purely observational. The emitter sees each line after its decision is final and
//! never feeds anything back into the governor.

use std::io::Write;

use serde::Serialize;

use crate::governor::{Governed, GovernorError, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Feedrate lowered by the governor.
    Slowed,
    /// Left at its commanded feedrate but still shorter than the budget.
    SubBudget,
    /// Move with length but no usable feedrate.
    Degenerate,
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRecord {
    pub kind: RecordKind,
    /// Layer markers seen so far; the preamble before the first marker is layer 0.
    pub layer: usize,
    pub line: usize,
    pub original_feedrate: Option<f64>,
    pub emitted_feedrate: Option<f64>,
    pub distance: f64,
    pub nominal_duration: Option<f64>,
    pub min_duration: Option<f64>,
    pub emitted_duration: Option<f64>,
    /// The move still finishes before the controller's per-instruction budget.
    pub sub_budget: bool,
    pub floor_limited: bool,
    pub borrowed: f64,
    pub eased: bool,
}

impl DiagnosticRecord {
    /// Build a record for a line, or `None` when there is nothing to report.
    pub fn from_governed(governed: &Governed) -> Option<Self> {
        let line = governed.instruction.line_number;
        let layer = governed.layer;
        match &governed.outcome {
            Outcome::Passthrough => None,
            Outcome::Degenerate(GovernorError::DegenerateSegment { distance, feedrate, .. }) => Some(Self {
                kind: RecordKind::Degenerate,
                layer,
                line,
                original_feedrate: *feedrate,
                emitted_feedrate: *feedrate,
                distance: *distance,
                nominal_duration: None,
                min_duration: None,
                emitted_duration: None,
                sub_budget: false,
                floor_limited: false,
                borrowed: 0.0,
                eased: false,
            }),
            Outcome::Degenerate(_) => None,
            Outcome::Governed(d) => {
                let kind = if d.is_modified() {
                    RecordKind::Slowed
                } else if d.is_sub_budget() {
                    RecordKind::SubBudget
                } else {
                    return None;
                };
                Some(Self {
                    kind,
                    layer,
                    line,
                    original_feedrate: Some(d.commanded()),
                    emitted_feedrate: Some(d.emitted_feedrate),
                    distance: d.timing.distance,
                    nominal_duration: Some(d.timing.nominal_duration),
                    min_duration: Some(d.timing.min_duration),
                    emitted_duration: Some(d.emitted_duration()),
                    sub_budget: d.is_sub_budget(),
                    floor_limited: d.floor_limited,
                    borrowed: d.borrowed,
                    eased: d.eased,
                })
            }
        }
    }
}

impl std::fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "layer {} line {}: {:?} F{:?} -> F{:?}, {:.4} mm, {:.6}s nominal, {:.6}s minimum",
            self.layer,
            self.line,
            self.kind,
            self.original_feedrate,
            self.emitted_feedrate,
            self.distance,
            self.nominal_duration.unwrap_or_default(),
            self.min_duration.unwrap_or_default(),
        )?;
        if self.sub_budget {
            write!(f, " (still under budget: {:.6}s)", self.emitted_duration.unwrap_or_default())?;
        }
        Ok(())
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub lines: usize,
    pub eligible: usize,
    pub modified: usize,
    pub sub_budget: usize,
    pub floor_limited: usize,
    pub smoothed: usize,
    pub degenerate: usize,
    /// Print time added by slowed moves, seconds.
    pub added_seconds: f64,
}

pub struct DiagnosticsEmitter {
    debug_layers: usize,
    records: Vec<DiagnosticRecord>,
    sink: Option<Box<dyn Write + Send>>,
    summary: RunSummary,
}

impl DiagnosticsEmitter {
    /// Keep records for lines in layers `0..debug_layers`.
    pub fn new(debug_layers: usize) -> Self {
        Self { debug_layers, records: Vec::new(), sink: None, summary: RunSummary::default() }
    }

    /// Also write every kept record as a JSON line to `sink`.
    pub fn with_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn observe(&mut self, governed: &Governed) {
        self.summary.lines += 1;
        match &governed.outcome {
            Outcome::Governed(d) => {
                self.summary.eligible += 1;
                if d.is_modified() {
                    self.summary.modified += 1;
                    self.summary.added_seconds += d.added_time();
                }
                if d.is_sub_budget() {
                    self.summary.sub_budget += 1;
                }
                if d.floor_limited {
                    self.summary.floor_limited += 1;
                }
                if d.is_smoothed() {
                    self.summary.smoothed += 1;
                }
            }
            Outcome::Degenerate(e) => {
                self.summary.degenerate += 1;
                tracing::warn!("{}; passed through unchanged", e);
            }
            Outcome::Passthrough => {}
        }

        if governed.layer >= self.debug_layers {
            return;
        }
        let Some(record) = DiagnosticRecord::from_governed(governed) else {
            return;
        };
        tracing::debug!("{}", record);
        if let Some(sink) = self.sink.as_mut() {
            let written = serde_json::to_string(&record)
                .map_err(std::io::Error::other)
                .and_then(|json| writeln!(sink, "{}", json));
            if let Err(e) = written {
                tracing::error!("Failed to write diagnostic record: {}", e);
                self.sink = None;
            }
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[DiagnosticRecord] {
        &self.records
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Flush the sink and return the totals.
    pub fn finish(mut self) -> RunSummary {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                tracing::error!("Failed to flush diagnostics: {}", e);
            }
        }
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::Instruction;
    use crate::governor::{Governor, PolicyKind};
    use crate::profile::{FeedrateUnit, PrinterProfile};
    use std::sync::{Arc, Mutex};

    fn governed(src: &[&str]) -> Vec<Governed> {
        let profile = PrinterProfile::builder(50.0, 10.0).feedrate_unit(FeedrateUnit::PerSecond).build().unwrap();
        let instructions = src.iter().enumerate().map(|(i, l)| {
            let mut instr = Instruction::parse(i + 1, l);
            instr.layer_boundary = instr.starts_with_marker(";LAYER:");
            instr
        });
        Governor::govern_all(profile, PolicyKind::Baseline.build(), instructions)
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_floor_clamped_move_reported_as_sub_budget() {
        let out = governed(&["G28", "G1 X0.05 F6000"]);
        let record = DiagnosticRecord::from_governed(&out[1]).unwrap();
        assert_eq!(record.kind, RecordKind::Slowed);
        assert_eq!(record.original_feedrate, Some(6000.0));
        assert_eq!(record.emitted_feedrate, Some(10.0));
        assert!(record.sub_budget);
        assert!(record.floor_limited);
        assert!((record.emitted_duration.unwrap() - 0.005).abs() < 1e-12);
        assert!(record.to_string().contains("still under budget"));
    }

    #[test]
    fn test_records_limited_to_debug_layers() {
        let src = ["G28", "G1 X1 F6000", ";LAYER:0", "G1 X2", ";LAYER:1", "G1 X3", "G1 X300"];
        let mut emitter = DiagnosticsEmitter::new(2);
        for g in governed(&src) {
            emitter.observe(&g);
        }
        let lines: Vec<usize> = emitter.records().iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 4]);
        let summary = emitter.finish();
        assert_eq!(summary.lines, 7);
        assert_eq!(summary.eligible, 4);
        assert_eq!(summary.modified, 3);
        assert!(summary.added_seconds > 0.0);
    }

    #[test]
    fn test_no_records_when_debug_off() {
        let mut emitter = DiagnosticsEmitter::new(0);
        for g in governed(&["G28", "G1 X1 F6000"]) {
            emitter.observe(&g);
        }
        assert!(emitter.records().is_empty());
        assert_eq!(emitter.summary().modified, 1);
    }

    #[test]
    fn test_degenerate_counted_and_recorded() {
        let mut emitter = DiagnosticsEmitter::new(1);
        for g in governed(&["G28", "G1 X5"]) {
            emitter.observe(&g);
        }
        assert_eq!(emitter.summary().degenerate, 1);
        assert_eq!(emitter.records()[0].kind, RecordKind::Degenerate);
    }

    #[test]
    fn test_json_lines_sink() {
        let buf = SharedBuf::default();
        let mut emitter = DiagnosticsEmitter::new(5).with_sink(Box::new(buf.clone()));
        for g in governed(&["G28", "G1 X1 F6000", "G1 X1.5"]) {
            emitter.observe(&g);
        }
        emitter.finish();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let rows: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["kind"], "slowed");
        assert_eq!(rows[0]["emitted_feedrate"], 50.0);
        assert_eq!(rows[1]["line"], 3);
    }
}
