//! Timeline builder and lookahead index.
//!
//! A single forward pass over the command list estimates when every command
//! starts, detects extrusion, and cuts the print into per-tool usage
//! intervals. Intervals live in one chronological arena; a per-tool index of
//! arena slots is binary-searched by start time to answer "when is this tool
//! needed next".

use std::collections::BTreeMap;

use crate::config::{SchedulerConfig, TimingMode};
use crate::gcode::{Command, CommandKind, Motion};

/// E deltas at or below this are not extrusion.
const EXTRUSION_EPSILON: f64 = 1e-9;

/// A maximal span in which `tool` is the active, extruding tool.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageInterval {
    pub tool: u32,
    pub start_time: f64,
    pub end_time: f64,
    /// Index of the `Tn` that activated the tool.
    pub select_index: Option<usize>,
    /// Index of the first extruding command.
    pub start_index: usize,
    pub last_extrusion_index: usize,
    /// Index of the `Tn` that switched away, `None` when the stream ended.
    pub end_index: Option<usize>,
}

/// A `Tn` that changed the active tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolChange {
    pub index: usize,
    pub from: Option<u32>,
    pub to: u32,
}

/// A slicer `M104`/`M109` resolved to the tool it addresses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterTarget {
    pub index: usize,
    pub tool: u32,
    pub target: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    stamps: Vec<f64>,
    extrudes: Vec<bool>,
    lines: Vec<usize>,
    end_time: f64,
    intervals: Vec<UsageInterval>,
    by_tool: BTreeMap<u32, Vec<usize>>,
    tool_changes: Vec<ToolChange>,
    first_selection: BTreeMap<u32, usize>,
    heater_targets: Vec<HeaterTarget>,
}

struct TimelineBuilder {
    timing: TimingMode,
    line_cost: f64,
    time: f64,
    position: [Option<f64>; 3],
    e_position: f64,
    feedrate: Option<f64>,
    /// `G91`: every axis, E included, is relative.
    relative_axes: bool,
    /// `M83`: E is relative regardless of `G90`.
    relative_extrusion: bool,
    current_tool: Option<u32>,
    select_index: Option<usize>,
    open: Option<UsageInterval>,
    warned_toolless: bool,
    timeline: Timeline,
}

impl TimelineBuilder {
    fn new(config: &SchedulerConfig, len: usize) -> Self {
        Self {
            timing: config.timing,
            line_cost: config.line_cost,
            time: 0.0,
            position: [None; 3],
            e_position: 0.0,
            feedrate: None,
            relative_axes: false,
            relative_extrusion: false,
            current_tool: None,
            select_index: None,
            open: None,
            warned_toolless: false,
            timeline: Timeline {
                stamps: Vec::with_capacity(len),
                extrudes: Vec::with_capacity(len),
                lines: Vec::with_capacity(len),
                ..Timeline::default()
            },
        }
    }

    fn step(&mut self, index: usize, command: &Command) {
        let start = self.time;
        let mut extrudes = false;
        let mut duration = None;

        match &command.kind {
            CommandKind::ToolSelect { tool } => self.select_tool(index, *tool, start),
            CommandKind::Move(motion) => {
                let (move_duration, move_extrudes) = self.apply_move(motion);
                duration = move_duration;
                extrudes = move_extrudes;
            }
            CommandKind::Dwell { seconds } if *seconds > 0.0 => duration = Some(*seconds),
            CommandKind::Positioning { relative } => self.relative_axes = *relative,
            CommandKind::ExtrusionMode { relative } => self.relative_extrusion = *relative,
            CommandKind::SetPosition(motion) => self.set_position(motion),
            CommandKind::SetTemperature { tool, target, .. } => {
                if let Some(tool) = tool.or(self.current_tool) {
                    self.timeline.heater_targets.push(HeaterTarget { index, tool, target: *target });
                }
            }
            _ => {}
        }

        if extrudes {
            self.record_extrusion(index, start);
        }

        let cost = match self.timing {
            TimingMode::Lines => 1.0,
            TimingMode::Estimated => duration.filter(|d| *d > 0.0).unwrap_or(self.line_cost),
        };
        self.timeline.stamps.push(start);
        self.timeline.extrudes.push(extrudes);
        self.timeline.lines.push(command.line);
        self.time = start + cost;
    }

    fn select_tool(&mut self, index: usize, tool: u32, now: f64) {
        if self.current_tool == Some(tool) {
            return;
        }
        self.timeline.tool_changes.push(ToolChange { index, from: self.current_tool, to: tool });
        self.timeline.first_selection.entry(tool).or_insert(index);
        self.close_interval(now, Some(index));
        self.current_tool = Some(tool);
        self.select_index = Some(index);
    }

    fn record_extrusion(&mut self, index: usize, now: f64) {
        let Some(tool) = self.current_tool else {
            if !self.warned_toolless {
                tracing::debug!("Extrusion on line {} before any tool is selected", index + 1);
                self.warned_toolless = true;
            }
            return;
        };
        match self.open.as_mut() {
            Some(open) => open.last_extrusion_index = index,
            None => {
                self.open = Some(UsageInterval {
                    tool,
                    start_time: now,
                    end_time: now,
                    select_index: self.select_index,
                    start_index: index,
                    last_extrusion_index: index,
                    end_index: None,
                });
            }
        }
    }

    fn close_interval(&mut self, now: f64, end_index: Option<usize>) {
        if let Some(mut interval) = self.open.take() {
            interval.end_time = now;
            interval.end_index = end_index;
            let slot = self.timeline.intervals.len();
            self.timeline.by_tool.entry(interval.tool).or_default().push(slot);
            self.timeline.intervals.push(interval);
        }
    }

    /// Returns the estimated duration and whether the move extrudes.
    fn apply_move(&mut self, motion: &Motion) -> (Option<f64>, bool) {
        if let Some(f) = motion.f.filter(|f| *f > 0.0) {
            self.feedrate = Some(f);
        }

        let mut distance_sq = 0.0;
        for (axis, value) in [motion.x, motion.y, motion.z].into_iter().enumerate() {
            let Some(value) = value else { continue };
            let previous = self.position[axis];
            let (delta, target) = if self.relative_axes {
                (Some(value), previous.unwrap_or(0.0) + value)
            } else {
                (previous.map(|p| value - p), value)
            };
            if let Some(delta) = delta {
                distance_sq += delta * delta;
            }
            self.position[axis] = Some(target);
        }

        let relative_e = self.relative_axes || self.relative_extrusion;
        let e_delta = motion.e.map(|e| {
            if relative_e {
                self.e_position += e;
                e
            } else {
                let delta = e - self.e_position;
                self.e_position = e;
                delta
            }
        });
        let extrudes = matches!(e_delta, Some(d) if d > EXTRUSION_EPSILON);

        let mut distance = distance_sq.sqrt();
        if distance <= 0.0 {
            distance = e_delta.map(f64::abs).unwrap_or(0.0);
        }
        let duration = match self.feedrate {
            Some(feed) if distance > 0.0 => Some(distance / feed * 60.0),
            _ => None,
        };
        (duration, extrudes)
    }

    fn set_position(&mut self, motion: &Motion) {
        for (axis, value) in [motion.x, motion.y, motion.z].into_iter().enumerate() {
            if value.is_some() {
                self.position[axis] = value;
            }
        }
        if let Some(e) = motion.e {
            self.e_position = e;
        }
        // A bare G92 zeroes every axis
        if motion.x.is_none() && motion.y.is_none() && motion.z.is_none() && motion.e.is_none() {
            self.position = [Some(0.0); 3];
            self.e_position = 0.0;
        }
    }

    fn finish(mut self) -> Timeline {
        let now = self.time;
        self.close_interval(now, None);
        self.timeline.end_time = now;
        self.timeline
    }
}

impl Timeline {
    /// Build the timeline in one forward pass.
    pub fn build(commands: &[Command], config: &SchedulerConfig) -> Self {
        let mut builder = TimelineBuilder::new(config, commands.len());
        for (index, command) in commands.iter().enumerate() {
            builder.step(index, command);
        }
        let timeline = builder.finish();
        tracing::debug!(
            "Timeline: {} commands, {} usage intervals, {} toolchanges, end time {:.2}",
            timeline.len(),
            timeline.intervals.len(),
            timeline.tool_changes.len(),
            timeline.end_time
        );
        timeline
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Estimated time at which the command at `index` starts.
    pub fn stamp(&self, index: usize) -> f64 {
        self.stamps.get(index).copied().unwrap_or(self.end_time)
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn is_extrusion(&self, index: usize) -> bool {
        self.extrudes.get(index).copied().unwrap_or(false)
    }

    /// 1-based input line number of the command at `index`.
    pub fn line_number(&self, index: usize) -> usize {
        self.lines.get(index).map_or(index + 1, |line| line + 1)
    }

    /// All usage intervals in chronological order.
    pub fn intervals(&self) -> &[UsageInterval] {
        &self.intervals
    }

    pub fn intervals_for(&self, tool: u32) -> impl Iterator<Item = &UsageInterval> + '_ {
        self.by_tool
            .get(&tool)
            .into_iter()
            .flatten()
            .map(move |&slot| &self.intervals[slot])
    }

    pub fn tools_used(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_tool.keys().copied()
    }

    pub fn tool_changes(&self) -> &[ToolChange] {
        &self.tool_changes
    }

    /// Every tool ever selected, with the index of its first selection.
    pub fn first_selections(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.first_selection.iter().map(|(tool, index)| (*tool, *index))
    }

    pub fn heater_targets(&self) -> &[HeaterTarget] {
        &self.heater_targets
    }

    /// First usage interval of `tool` starting strictly after `from_time`,
    /// or `None` when the tool is never used again.
    pub fn next_use(&self, tool: u32, from_time: f64) -> Option<&UsageInterval> {
        let slots = self.by_tool.get(&tool)?;
        let k = slots.partition_point(|&slot| self.intervals[slot].start_time <= from_time);
        slots.get(k).map(|&slot| &self.intervals[slot])
    }

    /// Insertion slot for `time`: the index of the command running at that
    /// time, so a line inserted there executes no later than `time`.
    /// `len()` at or past the end of the stream.
    pub fn position_at(&self, time: f64) -> usize {
        if time >= self.end_time {
            return self.len();
        }
        self.stamps.partition_point(|&stamp| stamp <= time).saturating_sub(1)
    }

    /// The toolchange made by the `Tn` at `index`, if it changed the tool.
    pub fn tool_change_at(&self, index: usize) -> Option<&ToolChange> {
        self.tool_changes
            .binary_search_by_key(&index, |change| change.index)
            .ok()
            .map(|k| &self.tool_changes[k])
    }
}
