//! Line-oriented G-code parser.
//!
//! Each line is tokenized into `<letter><number>` words the way the host's
//! streaming parser does it, then classified into a [`CommandKind`]. Parsing
//! never fails a run: a line that is not made of plain words is passed
//! through, and a recognized command with a broken numeric field degrades to
//! passthrough with a warning.

use std::ops::Range;

use thiserror::Error;

use super::{Command, CommandKind, Motion};
use crate::error::Warning;

/// Comment appended to every line this tool inserts. Lines carrying it are
/// recognized on re-runs and regenerated instead of duplicated.
pub const INSERTION_MARKER: &str = "; inserted by krusty-toolwizard";

/// Fan speed assumed for `M106` without an `S` word.
pub const FULL_FAN_SPEED: f64 = 255.0;

/// Numeric field failure inside a recognized command.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct GCodeError {
    pub message: String,
    pub span: Range<usize>,
}

/// A single `<letter><number>` word with its byte span in the line.
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeWord<'a> {
    pub letter: char,
    pub value: &'a str,
    pub span: Range<usize>,
}

impl GCodeWord<'_> {
    pub fn number(&self) -> Result<f64, GCodeError> {
        self.value.parse::<f64>().map_err(|_| GCodeError {
            message: format!("invalid number '{}' for {}", self.value, self.letter),
            span: self.span.clone(),
        })
    }

    pub fn integer(&self) -> Result<u32, GCodeError> {
        self.value.parse::<u32>().map_err(|_| GCodeError {
            message: format!("invalid integer '{}' for {}", self.value, self.letter),
            span: self.span.clone(),
        })
    }
}

/// Result of parsing a whole file.
#[derive(Debug, Clone, Default)]
pub struct ParsedProgram {
    pub commands: Vec<Command>,
    pub warnings: Vec<Warning>,
    /// Whether the input ended with a newline.
    pub trailing_newline: bool,
    /// Whether the input uses `\r\n` line endings.
    pub crlf: bool,
}

/// Split the code part of a line into words.
///
/// Returns `None` when the line holds anything besides words and comments,
/// e.g. a Klipper macro call like `SET_FAN_SPEED FAN=part SPEED=0.5`.
pub fn tokenize(line: &str) -> Option<Vec<GCodeWord<'_>>> {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let mut pos = 0;
    let mut words = Vec::new();
    while pos < len {
        while pos < len && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= len {
            break;
        }
        match bytes[pos] {
            // Comment or checksum ends the code part
            b';' | b'*' => break,
            b'(' => {
                while pos < len && bytes[pos] != b')' {
                    pos += 1;
                }
                if pos >= len {
                    return None;
                }
                pos += 1;
            }
            c if c.is_ascii_alphabetic() => {
                let start = pos;
                pos += 1;
                let value_start = pos;
                while pos < len && (bytes[pos].is_ascii_digit() || matches!(bytes[pos], b'.' | b'-' | b'+')) {
                    pos += 1;
                }
                // A word has to stand on its own
                if pos < len && !(bytes[pos].is_ascii_whitespace() || matches!(bytes[pos], b';' | b'(' | b'*')) {
                    return None;
                }
                words.push(GCodeWord {
                    letter: (c as char).to_ascii_uppercase(),
                    value: &line[value_start..pos],
                    span: start..pos,
                });
            }
            _ => return None,
        }
    }
    Some(words)
}

fn param<'w, 'a>(words: &'w [GCodeWord<'a>], letter: char) -> Option<&'w GCodeWord<'a>> {
    words.iter().find(|w| w.letter == letter)
}

fn number_param(words: &[GCodeWord<'_>], letter: char) -> Result<Option<f64>, GCodeError> {
    param(words, letter).map(GCodeWord::number).transpose()
}

fn motion(params: &[GCodeWord<'_>]) -> Result<Motion, GCodeError> {
    Ok(Motion {
        x: number_param(params, 'X')?,
        y: number_param(params, 'Y')?,
        z: number_param(params, 'Z')?,
        e: number_param(params, 'E')?,
        f: number_param(params, 'F')?,
    })
}

/// `P` selects a fan other than the part-cooling fan.
fn addresses_other_fan(params: &[GCodeWord<'_>]) -> Result<bool, GCodeError> {
    Ok(matches!(number_param(params, 'P')?, Some(p) if p != 0.0))
}

fn set_temperature(params: &[GCodeWord<'_>], wait: bool) -> Result<CommandKind, GCodeError> {
    let tool = param(params, 'T').map(GCodeWord::integer).transpose()?;
    let target = match number_param(params, 'S')? {
        Some(s) => Some(s),
        None => number_param(params, 'R')?,
    };
    Ok(match target {
        Some(target) => CommandKind::SetTemperature { tool, target, wait },
        None => CommandKind::Passthrough,
    })
}

/// Classify a tokenized line.
pub fn classify(words: &[GCodeWord<'_>]) -> Result<CommandKind, GCodeError> {
    // Skip a leading line number
    let words = match words.first() {
        Some(w) if w.letter == 'N' => &words[1..],
        _ => words,
    };
    let Some((first, params)) = words.split_first() else {
        return Ok(CommandKind::Passthrough);
    };
    let code = first.value.parse::<u32>().ok();
    let kind = match (first.letter, code) {
        ('T', _) => CommandKind::ToolSelect { tool: first.integer()? },
        ('G', Some(0..=3)) => CommandKind::Move(motion(params)?),
        ('G', Some(4)) => {
            let seconds = match (number_param(params, 'P')?, number_param(params, 'S')?) {
                (Some(ms), _) => ms / 1000.0,
                (None, Some(s)) => s,
                (None, None) => 0.0,
            };
            CommandKind::Dwell { seconds }
        }
        ('G', Some(90)) => CommandKind::Positioning { relative: false },
        ('G', Some(91)) => CommandKind::Positioning { relative: true },
        ('G', Some(92)) => CommandKind::SetPosition(motion(params)?),
        ('M', Some(82)) => CommandKind::ExtrusionMode { relative: false },
        ('M', Some(83)) => CommandKind::ExtrusionMode { relative: true },
        ('M', Some(104)) => set_temperature(params, false)?,
        ('M', Some(109)) => set_temperature(params, true)?,
        ('M', Some(106)) => {
            if addresses_other_fan(params)? {
                CommandKind::Passthrough
            } else {
                let speed = number_param(params, 'S')?.unwrap_or(FULL_FAN_SPEED);
                CommandKind::SetFan { speed }
            }
        }
        ('M', Some(107)) => {
            if addresses_other_fan(params)? {
                CommandKind::Passthrough
            } else {
                CommandKind::SetFan { speed: 0.0 }
            }
        }
        _ => CommandKind::Passthrough,
    };
    Ok(kind)
}

/// Parse one line. `Err` means a recognized command carried a broken
/// numeric field; callers degrade such lines to passthrough.
pub fn parse_line(line: usize, raw: &str) -> Result<Command, GCodeError> {
    if raw.contains(INSERTION_MARKER) {
        return Ok(Command { line, raw: raw.to_string(), kind: CommandKind::Generated });
    }
    let text = raw.strip_suffix('\r').unwrap_or(raw);
    let kind = match tokenize(text) {
        Some(words) => classify(&words)?,
        None => CommandKind::Passthrough,
    };
    Ok(Command { line, raw: raw.to_string(), kind })
}

/// Parse a whole file. Lossless: every line yields exactly one command.
pub fn parse_program(input: &str) -> ParsedProgram {
    let mut program = ParsedProgram {
        commands: Vec::new(),
        warnings: Vec::new(),
        trailing_newline: input.ends_with('\n'),
        crlf: input.contains("\r\n"),
    };
    if input.is_empty() {
        return program;
    }
    let body = input.strip_suffix('\n').unwrap_or(input);
    for (index, raw) in body.split('\n').enumerate() {
        match parse_line(index, raw) {
            Ok(command) => program.commands.push(command),
            Err(e) => {
                tracing::debug!("Line {} degraded to passthrough: {}", index + 1, e);
                program.warnings.push(Warning::ParseDegradation { line: index + 1, reason: e.message });
                program.commands.push(Command::passthrough(index, raw));
            }
        }
    }
    tracing::debug!("Parsed {} G-code lines", program.commands.len());
    program
}
