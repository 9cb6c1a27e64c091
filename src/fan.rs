// src/fan.rs - Fan carryover across toolchanges
use serde::Serialize;

use crate::gcode::{Command, CommandKind};
use crate::scheduler::Schedule;
use crate::timeline::Timeline;

/// Last explicitly commanded part-cooling fan speed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FanState {
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanInsertionKind {
    /// `M106 S0` just before the toolchange.
    Park,
    /// The pre-toolchange speed, just after it.
    Reassert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanInsertion {
    /// Insert before the command at this index.
    pub position: usize,
    /// Incoming tool.
    pub tool: u32,
    pub kind: FanInsertionKind,
    pub speed: f64,
}

impl FanInsertion {
    pub fn gcode(&self) -> String {
        format!("M106 S{}", self.speed)
    }
}

pub struct FanTracker<'a> {
    timeline: &'a Timeline,
    schedule: &'a Schedule,
    park_on_toolchange: bool,
}

impl<'a> FanTracker<'a> {
    pub fn new(timeline: &'a Timeline, schedule: &'a Schedule, park_on_toolchange: bool) -> Self {
        Self { timeline, schedule, park_on_toolchange }
    }

    /// Walk the stream and carry the fan speed over every toolchange into a
    /// managed tool.
    pub fn plan(&self, commands: &[Command]) -> Vec<FanInsertion> {
        let mut fan = FanState::default();
        let mut active: Option<u32> = None;
        let mut insertions = Vec::new();

        for (index, command) in commands.iter().enumerate() {
            match command.kind {
                CommandKind::SetFan { speed } => fan.speed = speed,
                CommandKind::ToolSelect { tool } => {
                    let previous = active.replace(tool);
                    if !matches!(previous, Some(prev) if prev != tool) {
                        continue;
                    }
                    if !self.schedule.is_managed(tool) {
                        tracing::debug!("Toolchange to unmanaged T{} on line {} left as is", tool, self.timeline.line_number(index));
                        continue;
                    }
                    if self.park_on_toolchange {
                        insertions.push(FanInsertion { position: index, tool, kind: FanInsertionKind::Park, speed: 0.0 });
                    }
                    if self.sets_own_fan(commands, index) {
                        tracing::debug!("T{} sets its own fan after line {}", tool, self.timeline.line_number(index));
                        continue;
                    }
                    insertions.push(FanInsertion { position: index + 1, tool, kind: FanInsertionKind::Reassert, speed: fan.speed });
                }
                _ => {}
            }
        }
        insertions
    }

    /// Whether an explicit fan command follows the toolchange at `index`
    /// before the new tool's first extrusion.
    fn sets_own_fan(&self, commands: &[Command], index: usize) -> bool {
        for (offset, command) in commands[index + 1..].iter().enumerate() {
            match command.kind {
                CommandKind::SetFan { .. } => return true,
                CommandKind::ToolSelect { .. } => return false,
                _ if self.timeline.is_extrusion(index + 1 + offset) => return false,
                _ => {}
            }
        }
        false
    }
}
