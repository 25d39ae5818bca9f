//! Stream rewriter: turns governed instructions back into output text.
//!
//! `F` is modal in G-code, so once a slowed move has been written the controller's
//! feedrate no longer matches the source file. The rewriter tracks the feedrate the
//! controller will actually be running at and writes the source feedrate back onto
//! the next move that relies on it.

use crate::gcode::Instruction;
use crate::governor::Governed;

/// Output for one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenLine {
    pub text: String,
    /// Verbose-mode copy of the original line, written on the line after `text`.
    pub comment: Option<String>,
}

impl RewrittenLine {
    fn verbatim(instruction: &Instruction) -> Self {
        Self { text: instruction.raw.clone(), comment: None }
    }

    pub fn is_changed(&self, instruction: &Instruction) -> bool {
        self.text != instruction.raw
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamRewriter {
    verbose: bool,
    precision: u32,
    /// Feedrate the controller is running at given everything emitted so far.
    controller_feedrate: Option<f64>,
}

impl StreamRewriter {
    pub fn new(verbose: bool, precision: u32) -> Self {
        Self { verbose, precision, controller_feedrate: None }
    }

    pub fn controller_feedrate(&self) -> Option<f64> {
        self.controller_feedrate
    }

    pub fn rewrite(&mut self, governed: &Governed) -> RewrittenLine {
        let instruction = &governed.instruction;
        if !instruction.uses_feedrate() {
            return RewrittenLine::verbatim(instruction);
        }

        if let Some(decision) = governed.decision().filter(|d| d.is_modified()) {
            let value = format_feedrate(decision.emitted_feedrate, self.precision);
            self.controller_feedrate = Some(decision.emitted_feedrate);
            return self.edited(instruction, &value);
        }

        if let Some(own) = instruction.feedrate {
            self.controller_feedrate = Some(own);
            return RewrittenLine::verbatim(instruction);
        }

        match governed.modal_feedrate {
            Some(source) if self.controller_feedrate.is_some_and(|c| c != source) => {
                if instruction.checksummed {
                    tracing::warn!(
                        "line {}: checksummed move runs at F{} instead of F{}",
                        instruction.line_number,
                        self.controller_feedrate.unwrap_or_default(),
                        source
                    );
                    return RewrittenLine::verbatim(instruction);
                }
                self.controller_feedrate = Some(source);
                self.edited(instruction, &source.to_string())
            }
            _ => RewrittenLine::verbatim(instruction),
        }
    }

    fn edited(&self, instruction: &Instruction, value: &str) -> RewrittenLine {
        let text = with_feedrate(instruction, value);
        let comment = self.verbose.then(|| format!("; was: {}", instruction.raw.trim()));
        RewrittenLine { text, comment }
    }
}

/// Format a feedrate with a fixed number of decimals.
pub fn format_feedrate(value: f64, precision: u32) -> String {
    format!("{:.*}", precision as usize, value)
}

/// Replace the `F` word of a line, or insert one after the last word.
pub fn with_feedrate(instruction: &Instruction, value: &str) -> String {
    let raw = &instruction.raw;
    match &instruction.feedrate_span {
        Some(span) => {
            let letter = &raw[span.start..span.start + 1];
            format!("{}{}{}{}", &raw[..span.start], letter, value, &raw[span.end..])
        }
        None => {
            let at = instruction.insert_at.min(raw.len());
            format!("{} F{}{}", &raw[..at], value, &raw[at..])
        }
    }
}
