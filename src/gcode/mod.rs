// src/gcode/mod.rs - Typed G-code command model
pub mod parser;

pub use parser::{parse_line, parse_program, GCodeError, GCodeWord, ParsedProgram, INSERTION_MARKER};

/// Axis words of a motion or set-position command. `None` means the word was absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub f: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// `Tn`
    ToolSelect { tool: u32 },
    /// `M104` / `M109`. `tool` is `None` when the command addresses the active tool.
    SetTemperature { tool: Option<u32>, target: f64, wait: bool },
    /// `M106 S..` / `M107` on the part-cooling fan.
    SetFan { speed: f64 },
    /// `G0`-`G3`
    Move(Motion),
    /// `G4`
    Dwell { seconds: f64 },
    /// `G90` / `G91`
    Positioning { relative: bool },
    /// `M82` / `M83`
    ExtrusionMode { relative: bool },
    /// `G92`
    SetPosition(Motion),
    /// A line inserted by an earlier run of this tool.
    Generated,
    Passthrough,
}

/// One input line. Every line of the input maps to exactly one `Command`.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// 0-based line index in the input.
    pub line: usize,
    /// Original text without the `\n` terminator (a trailing `\r` is kept).
    pub raw: String,
    pub kind: CommandKind,
}

impl Command {
    pub fn passthrough(line: usize, raw: impl Into<String>) -> Self {
        Self { line, raw: raw.into(), kind: CommandKind::Passthrough }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.kind, CommandKind::Generated)
    }
}
