//! Streaming post-processor: reads G-code lines, runs them through the governor and
//! rewriter, and writes the result.
//!
//! Besides feeding the core, the pipeline owns the file-level bookkeeping: layer
//! markers, the settings header and added-time footer, and `;TIME_ELAPSED:`
//! comments, which are shifted by the time the governor has added so far.

use std::io::{BufRead, Write};

use thiserror::Error;

use crate::diagnostics::{DiagnosticsEmitter, RunSummary};
use crate::gcode::{Instruction, LineEnding, TIME_ELAPSED};
use crate::governor::{FeedratePolicy, Governed, Governor};
use crate::profile::{FeedrateUnit, PrinterProfile};
use crate::rewriter::{RewrittenLine, StreamRewriter};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File-level behaviour of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Comment prefix that starts a new layer.
    pub layer_marker: String,
    /// Write the settings header and added-time footer.
    pub annotate: bool,
    /// Shift `;TIME_ELAPSED:` comments by the added print time.
    pub adjust_time_elapsed: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { layer_marker: ";LAYER:".to_string(), annotate: true, adjust_time_elapsed: true }
    }
}

pub struct Pipeline<W: Write> {
    governor: Governor,
    rewriter: StreamRewriter,
    diagnostics: DiagnosticsEmitter,
    options: PipelineOptions,
    writer: W,
    line_number: usize,
    added_seconds: f64,
    header_written: bool,
    eol: &'static str,
    open_line: bool,
}

impl<W: Write> Pipeline<W> {
    pub fn new(profile: PrinterProfile, policy: Box<dyn FeedratePolicy>, options: PipelineOptions, writer: W) -> Self {
        let rewriter = StreamRewriter::new(profile.verbose(), profile.feedrate_precision());
        let diagnostics = DiagnosticsEmitter::new(profile.debug_layers());
        Self {
            governor: Governor::new(profile, policy),
            rewriter,
            diagnostics,
            options,
            writer,
            line_number: 0,
            added_seconds: 0.0,
            header_written: false,
            eol: "\n",
            open_line: false,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsEmitter) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Print time added so far, seconds.
    pub fn added_seconds(&self) -> f64 {
        self.added_seconds
    }

    /// Feed one line without its terminator.
    pub fn feed_line(&mut self, raw: &str, eol: LineEnding) -> Result<(), PipelineError> {
        self.line_number += 1;
        let mut instruction = Instruction::parse(self.line_number, raw);
        instruction.eol = eol;
        instruction.layer_boundary = instruction.starts_with_marker(&self.options.layer_marker);
        let ready = self.governor.push(instruction);
        self.emit(ready)
    }

    /// Feed every line of `reader`.
    pub fn feed_reader<R: BufRead>(&mut self, mut reader: R) -> Result<(), PipelineError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            let (body, eol) = split_line_ending(&buf);
            let text = match std::str::from_utf8(body) {
                Ok(text) => std::borrow::Cow::Borrowed(text),
                Err(_) => {
                    tracing::warn!("line {}: invalid UTF-8 replaced", self.line_number + 1);
                    String::from_utf8_lossy(body)
                }
            };
            self.feed_line(&text, eol)?;
        }
    }

    /// Release everything still pending, write the footer and flush.
    pub fn finish(mut self) -> Result<(W, RunSummary), PipelineError> {
        let rest = self.governor.finish();
        self.emit(rest)?;
        if self.options.annotate {
            if !self.header_written {
                self.write_header()?;
            }
            if self.added_seconds > 0.0 {
                let footer = format!(
                    ";Postprocessed by gcode-governor: additional print time to avoid stuttering = {}",
                    format_hms(self.added_seconds)
                );
                self.write_raw_line(&footer)?;
            }
        }
        self.writer.flush()?;
        let summary = self.diagnostics.finish();
        tracing::info!(
            "{} lines, {} moves governed, {} slowed ({} still under budget), {} degenerate, +{:.1}s",
            summary.lines,
            summary.eligible,
            summary.modified,
            summary.sub_budget,
            summary.degenerate,
            summary.added_seconds
        );
        Ok((self.writer, summary))
    }

    fn emit(&mut self, ready: Vec<Governed>) -> Result<(), PipelineError> {
        for governed in ready {
            self.diagnostics.observe(&governed);
            if let Some(d) = governed.decision().filter(|d| d.is_modified()) {
                self.added_seconds += d.added_time();
            }

            let instruction = &governed.instruction;
            if self.options.annotate
                && !self.header_written
                && (instruction.layer_boundary || instruction.is_command())
            {
                self.write_header()?;
            }

            let eol = instruction.eol.as_str();
            match instruction.eol {
                LineEnding::CrLf => self.eol = "\r\n",
                LineEnding::Lf => self.eol = "\n",
                LineEnding::None => {}
            }

            let elapsed = instruction.time_elapsed().filter(|_| self.options.adjust_time_elapsed);
            let line = match elapsed {
                Some(seconds) if self.added_seconds > 0.0 => {
                    let shifted = ((seconds + self.added_seconds) * 1e6).round() / 1e6;
                    RewrittenLine { text: format!("{}{}", TIME_ELAPSED, shifted), comment: None }
                }
                _ => self.rewriter.rewrite(&governed),
            };

            self.writer.write_all(line.text.as_bytes())?;
            if let Some(comment) = &line.comment {
                self.writer.write_all(self.eol.as_bytes())?;
                self.writer.write_all(comment.as_bytes())?;
            }
            self.writer.write_all(eol.as_bytes())?;
            self.open_line = eol.is_empty();
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), PipelineError> {
        self.header_written = true;
        let profile = self.governor.profile();
        let unit = match profile.feedrate_unit() {
            FeedrateUnit::PerMinute => "mm/min",
            FeedrateUnit::PerSecond => "mm/s",
        };
        let header = format!(
            ";Postprocessed by gcode-governor: max gcode per sec = {}/s, min feedrate = {}{}, policy = {}",
            profile.max_instructions_per_second(),
            profile.min_feedrate(),
            unit,
            self.governor.policy_name()
        );
        self.write_raw_line(&header)
    }

    fn write_raw_line(&mut self, text: &str) -> Result<(), PipelineError> {
        if self.open_line {
            self.writer.write_all(self.eol.as_bytes())?;
            self.open_line = false;
        }
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(self.eol.as_bytes())?;
        Ok(())
    }
}

fn split_line_ending(buf: &[u8]) -> (&[u8], LineEnding) {
    match buf {
        [body @ .., b'\r', b'\n'] => (body, LineEnding::CrLf),
        [body @ .., b'\n'] => (body, LineEnding::Lf),
        body => (body, LineEnding::None),
    }
}

/// `H:MM:SS`, rounded down to whole seconds.
pub fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Stream `reader` through a fresh pipeline into `writer`.
pub fn run<R: BufRead, W: Write>(
    reader: R,
    writer: W,
    profile: PrinterProfile,
    policy: Box<dyn FeedratePolicy>,
    options: PipelineOptions,
    diagnostics: Option<DiagnosticsEmitter>,
) -> Result<RunSummary, PipelineError> {
    tracing::info!(
        "Governing at {}/s, floor F{}, policy {}",
        profile.max_instructions_per_second(),
        profile.min_feedrate(),
        policy.name()
    );
    let mut pipeline = Pipeline::new(profile, policy, options, writer);
    if let Some(diagnostics) = diagnostics {
        pipeline = pipeline.with_diagnostics(diagnostics);
    }
    pipeline.feed_reader(reader)?;
    let (_, summary) = pipeline.finish()?;
    Ok(summary)
}

/// In-memory convenience wrapper around [`run`].
pub fn process_str(
    input: &str,
    profile: PrinterProfile,
    policy: Box<dyn FeedratePolicy>,
    options: PipelineOptions,
) -> Result<(String, RunSummary), PipelineError> {
    let mut pipeline = Pipeline::new(profile, policy, options, Vec::new());
    pipeline.feed_reader(input.as_bytes())?;
    let (bytes, summary) = pipeline.finish()?;
    Ok((String::from_utf8_lossy(&bytes).into_owned(), summary))
}
