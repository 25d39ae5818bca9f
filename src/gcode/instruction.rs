//! Typed view of one parsed G-code line.

use std::ops::Range;

use super::parser::{GCodeParser, GCodeToken};

/// Command class of a line, as far as feedrate governing cares.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// G0
    Rapid,
    /// G1
    Linear,
    /// G2 / G3
    Arc,
    /// G28
    Home,
    /// G92
    SetPosition,
    /// G90
    AbsolutePositioning,
    /// G91
    RelativePositioning,
    /// M82
    ExtruderAbsolute,
    /// M83
    ExtruderRelative,
    /// Any other command word, e.g. `M104` or `T0`.
    Other(String),
    /// Blank line or comment-only line.
    Empty,
    /// Could not be tokenized; always passed through.
    Unrecognized,
}

/// Axis words present on a line. `None` means the axis is not mentioned.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisWords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
}

impl AxisWords {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none() && self.e.is_none()
    }
}

/// Line terminator seen on input, reproduced on output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
    /// Last line of a file without a trailing newline.
    None,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::None => "",
        }
    }
}

/// One input line, tokenized and classified.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// 1-based line number in the input stream.
    pub line_number: usize,
    pub kind: CommandKind,
    pub axes: AxisWords,
    /// Feedrate word carried by this line, if any.
    pub feedrate: Option<f64>,
    /// Byte range of the `F` word within `raw`.
    pub feedrate_span: Option<Range<usize>>,
    /// Byte offset just past the last word, where a missing `F` word is inserted.
    pub insert_at: usize,
    pub comment: Option<String>,
    /// `*NN` checksum present; the line must not be edited.
    pub checksummed: bool,
    /// Set by the collaborator when this line starts a new layer.
    pub layer_boundary: bool,
    pub raw: String,
    pub eol: LineEnding,
}

impl Instruction {
    /// Classify a line. Never fails: anything that does not tokenize becomes
    /// [`CommandKind::Unrecognized`] and is passed through untouched.
    pub fn parse(line_number: usize, raw: &str) -> Instruction {
        let mut instruction = Instruction {
            line_number,
            kind: CommandKind::Empty,
            axes: AxisWords::default(),
            feedrate: None,
            feedrate_span: None,
            insert_at: raw.trim_end().len(),
            comment: None,
            checksummed: false,
            layer_boundary: false,
            raw: raw.to_string(),
            eol: LineEnding::Lf,
        };

        let tokens = match GCodeParser::tokenize(raw) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::trace!("line {}: {}", line_number, e);
                instruction.kind = CommandKind::Unrecognized;
                return instruction;
            }
        };

        let mut command: Option<(char, &str)> = None;
        let mut last_word_end = 0;
        for token in &tokens {
            match token {
                GCodeToken::Word { letter, value, span } => {
                    last_word_end = span.range.end;
                    if *letter == 'N' && command.is_none() {
                        continue;
                    }
                    if command.is_none() {
                        if !matches!(letter, 'G' | 'M' | 'T') {
                            instruction.kind = CommandKind::Unrecognized;
                            return instruction;
                        }
                        command = Some((*letter, value));
                        continue;
                    }
                    // Bare letters name an axis only for `G28 X`; elsewhere they carry nothing.
                    let number = if value.is_empty() {
                        if !command.is_some_and(|(l, code)| l == 'G' && code.parse::<f64>() == Ok(28.0)) {
                            continue;
                        }
                        0.0
                    } else {
                        match value.parse::<f64>() {
                            Ok(n) => n,
                            Err(_) => {
                                instruction.kind = CommandKind::Unrecognized;
                                return instruction;
                            }
                        }
                    };
                    match letter {
                        'X' => instruction.axes.x = Some(number),
                        'Y' => instruction.axes.y = Some(number),
                        'Z' => instruction.axes.z = Some(number),
                        'E' => instruction.axes.e = Some(number),
                        'F' => {
                            instruction.feedrate = Some(number);
                            instruction.feedrate_span = Some(span.range.clone());
                        }
                        _ => {}
                    }
                }
                GCodeToken::Comment(text, _) => {
                    if instruction.comment.is_none() {
                        instruction.comment = Some(text.to_string());
                    }
                }
                GCodeToken::Checksum { span, .. } => {
                    instruction.checksummed = true;
                    last_word_end = last_word_end.max(span.range.start);
                }
            }
        }

        instruction.insert_at = last_word_end;
        instruction.kind = match command {
            None => CommandKind::Empty,
            Some((letter, code)) => classify(letter, code),
        };
        instruction
    }

    /// G0 or G1: the two move kinds subject to governing.
    pub fn is_move(&self) -> bool {
        matches!(self.kind, CommandKind::Rapid | CommandKind::Linear)
    }

    /// Any command whose speed is taken from the modal feedrate.
    pub fn uses_feedrate(&self) -> bool {
        matches!(self.kind, CommandKind::Rapid | CommandKind::Linear | CommandKind::Arc)
    }

    /// True for every line that carries a command word.
    pub fn is_command(&self) -> bool {
        !matches!(self.kind, CommandKind::Empty | CommandKind::Unrecognized)
    }

    /// Whole-line comment starting with `marker` (e.g. `;LAYER:`).
    pub fn starts_with_marker(&self, marker: &str) -> bool {
        !marker.is_empty() && self.raw.trim_start().starts_with(marker)
    }

    /// Seconds value of a `;TIME_ELAPSED:` comment.
    pub fn time_elapsed(&self) -> Option<f64> {
        let rest = self.raw.trim_start().strip_prefix(TIME_ELAPSED)?;
        rest.trim().parse().ok()
    }
}

/// Slicer comment carrying the cumulative print time at a layer end.
pub const TIME_ELAPSED: &str = ";TIME_ELAPSED:";

fn classify(letter: char, code: &str) -> CommandKind {
    let numeric = code.parse::<f64>().ok();
    match (letter, numeric) {
        ('G', Some(n)) if n == 0.0 => CommandKind::Rapid,
        ('G', Some(n)) if n == 1.0 => CommandKind::Linear,
        ('G', Some(n)) if n == 2.0 || n == 3.0 => CommandKind::Arc,
        ('G', Some(n)) if n == 28.0 => CommandKind::Home,
        ('G', Some(n)) if n == 90.0 => CommandKind::AbsolutePositioning,
        ('G', Some(n)) if n == 91.0 => CommandKind::RelativePositioning,
        ('G', Some(n)) if n == 92.0 => CommandKind::SetPosition,
        ('M', Some(n)) if n == 82.0 => CommandKind::ExtruderAbsolute,
        ('M', Some(n)) if n == 83.0 => CommandKind::ExtruderRelative,
        (_, Some(_)) => CommandKind::Other(format!("{}{}", letter, code)),
        (_, None) => CommandKind::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_move_fields() {
        let instr = Instruction::parse(7, "G1 X10 Y20.5 E1.2 F1800 ; wall");
        assert_eq!(instr.kind, CommandKind::Linear);
        assert_eq!(instr.axes.x, Some(10.0));
        assert_eq!(instr.axes.y, Some(20.5));
        assert_eq!(instr.axes.z, None);
        assert_eq!(instr.axes.e, Some(1.2));
        assert_eq!(instr.feedrate, Some(1800.0));
        assert_eq!(instr.feedrate_span, Some(18..23));
        assert_eq!(instr.insert_at, 23);
        assert_eq!(instr.comment.as_deref(), Some("wall"));
        assert!(instr.is_move());
    }

    #[test]
    fn test_rapid_with_leading_zero_code() {
        let instr = Instruction::parse(1, "G00 X1");
        assert_eq!(instr.kind, CommandKind::Rapid);
    }

    #[test]
    fn test_line_numbers_and_checksum() {
        let instr = Instruction::parse(1, "N42 G1 X1 Y1*33");
        assert_eq!(instr.kind, CommandKind::Linear);
        assert!(instr.checksummed);
    }

    #[test]
    fn test_comment_only_and_blank() {
        assert_eq!(Instruction::parse(1, ";LAYER:3").kind, CommandKind::Empty);
        assert_eq!(Instruction::parse(1, "").kind, CommandKind::Empty);
        assert!(Instruction::parse(1, ";LAYER:3").starts_with_marker(";LAYER:"));
    }

    #[test]
    fn test_other_commands() {
        assert_eq!(Instruction::parse(1, "M104 S200").kind, CommandKind::Other("M104".to_string()));
        assert_eq!(Instruction::parse(1, "T1").kind, CommandKind::Other("T1".to_string()));
        assert_eq!(Instruction::parse(1, "G91").kind, CommandKind::RelativePositioning);
        assert_eq!(Instruction::parse(1, "M83").kind, CommandKind::ExtruderRelative);
    }

    #[test]
    fn test_unclassifiable_lines_pass_through() {
        assert_eq!(Instruction::parse(1, "X10 Y10").kind, CommandKind::Unrecognized);
        assert_eq!(Instruction::parse(1, "G1 X1..2").kind, CommandKind::Unrecognized);
        assert_eq!(Instruction::parse(1, "@pause now").kind, CommandKind::Unrecognized);
    }

    #[test]
    fn test_bare_axis_letter_only_counts_for_home() {
        let homed = Instruction::parse(1, "G28 X");
        assert_eq!(homed.axes.x, Some(0.0));
        let instr = Instruction::parse(2, "G1 X E1");
        assert_eq!(instr.kind, CommandKind::Linear);
        assert_eq!(instr.axes.x, None);
        assert_eq!(instr.axes.e, Some(1.0));
        assert_eq!(Instruction::parse(3, "G1 X10 F").feedrate, None);
    }

    #[test]
    fn test_time_elapsed_comment() {
        let instr = Instruction::parse(1, ";TIME_ELAPSED:123.5");
        assert_eq!(instr.time_elapsed(), Some(123.5));
        assert_eq!(Instruction::parse(1, ";TIME:10").time_elapsed(), None);
    }
}
