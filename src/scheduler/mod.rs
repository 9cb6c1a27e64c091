//! Heater scheduler.
//!
//! One small state machine per tool, driven by the timeline's lookahead
//! index. Every usage interval is entered (preheat if the tool is cold) and
//! left (disable, idle, or hold warm), and each decision becomes a
//! [`ScheduledEvent`] anchored at an insertion slot in the command stream.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::{Config, ToolSettings};
use crate::error::Warning;
use crate::timeline::{Timeline, UsageInterval};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaterState {
    Off,
    Idle,
    Preheating,
    Active,
}

/// Kinds of heater commands the scheduler inserts. Declaration order is the
/// order within a shared insertion slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Disable,
    IdleTransition,
    PreheatStart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledEvent {
    pub time: f64,
    /// Insert before the command at this index (`len` = end of stream).
    pub position: usize,
    pub tool: u32,
    pub kind: EventKind,
    pub target: f64,
}

impl ScheduledEvent {
    pub fn gcode(&self) -> String {
        format!("M104 T{} S{}", self.tool, self.target)
    }
}

/// A tool's heater entering `state` before the command at `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub position: usize,
    pub tool: u32,
    pub state: HeaterState,
}

/// Output of the heater scheduler.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Sorted by position, then time, kind and tool.
    pub events: Vec<ScheduledEvent>,
    /// Per-tool heater state changes, sorted by position.
    pub transitions: Vec<StateTransition>,
    pub final_states: BTreeMap<u32, HeaterState>,
    pub managed: BTreeSet<u32>,
    /// Transitions left out because the tool stays warm.
    pub held: usize,
    pub warnings: Vec<Warning>,
}

impl Schedule {
    pub fn is_managed(&self, tool: u32) -> bool {
        self.managed.contains(&tool)
    }

    pub fn events_for(&self, tool: u32) -> impl Iterator<Item = &ScheduledEvent> + '_ {
        self.events.iter().filter(move |e| e.tool == tool)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Heater state of `tool` just before the command at `position` runs.
    pub fn state_at(&self, tool: u32, position: usize) -> HeaterState {
        self.transitions
            .iter()
            .filter(|t| t.tool == tool && t.position <= position)
            .last()
            .map_or(HeaterState::Off, |t| t.state)
    }
}

#[derive(Debug, Clone, Copy)]
struct ToolHeater {
    state: HeaterState,
    /// Time and slot of the last event inserted for this tool.
    last_event: Option<(f64, usize)>,
}

impl ToolHeater {
    fn new() -> Self {
        Self { state: HeaterState::Off, last_event: None }
    }

    fn set(&mut self, schedule: &mut Schedule, tool: u32, position: usize, state: HeaterState) {
        self.state = state;
        schedule.transitions.push(StateTransition { position, tool, state });
    }
}

pub struct HeaterScheduler<'a> {
    config: &'a Config,
    timeline: &'a Timeline,
}

impl<'a> HeaterScheduler<'a> {
    pub fn new(config: &'a Config, timeline: &'a Timeline) -> Self {
        Self { config, timeline }
    }

    pub fn plan(&self) -> Schedule {
        let mut schedule = Schedule::default();

        for (tool, first_index) in self.timeline.first_selections() {
            if self.has_known_temperature(tool) {
                schedule.managed.insert(tool);
            } else {
                let warning = Warning::UnconfiguredTool { tool, line: self.timeline.line_number(first_index) };
                tracing::debug!("{}", warning);
                schedule.warnings.push(warning);
            }
        }

        let mut heaters: BTreeMap<u32, ToolHeater> =
            schedule.managed.iter().map(|tool| (*tool, ToolHeater::new())).collect();

        for interval in self.timeline.intervals() {
            let Some(heater) = heaters.get_mut(&interval.tool) else {
                continue;
            };
            let settings = self.config.tool_settings(interval.tool);
            self.enter(interval, &settings, heater, &mut schedule);
            let position = self.leave_position(interval, &schedule.managed);
            if !self.leave(interval, position, &settings, heater, &mut schedule) {
                schedule.held += 1;
            }
        }

        schedule.held += resolve_ties(&mut schedule);
        // Stable: a tool's transitions at one slot keep their push order
        schedule.transitions.sort_by_key(|t| t.position);
        schedule.events.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.time.total_cmp(&b.time))
                .then(a.kind.cmp(&b.kind))
                .then(a.tool.cmp(&b.tool))
        });
        schedule.final_states = heaters.into_iter().map(|(tool, h)| (tool, h.state)).collect();

        tracing::debug!(
            "Scheduled {} heater events for {} managed tools ({} held)",
            schedule.events.len(),
            schedule.managed.len(),
            schedule.held
        );
        schedule
    }

    fn has_known_temperature(&self, tool: u32) -> bool {
        self.config.tool_settings(tool).active_temperature.is_some()
            || (self.config.scheduler.infer_temperatures
                && self.timeline.heater_targets().iter().any(|h| h.tool == tool && h.target > 0.0))
    }

    /// Active temperature for a use of `tool` starting at `index`: the
    /// configured value, else the slicer's most recent non-zero target for
    /// the tool at or before `index`, else its first non-zero target.
    fn active_temperature(&self, tool: u32, settings: &ToolSettings, index: usize) -> Option<f64> {
        if settings.active_temperature.is_some() || !self.config.scheduler.infer_temperatures {
            return settings.active_temperature;
        }
        let mut targets = self.timeline.heater_targets().iter().filter(|h| h.tool == tool && h.target > 0.0);
        let first = targets.clone().next().map(|h| h.target);
        targets.filter(|h| h.index <= index).last().map(|h| h.target).or(first)
    }

    fn idle_temperature(&self, settings: &ToolSettings, active: f64) -> f64 {
        settings
            .idle_temperature
            .unwrap_or_else(|| (active - self.config.scheduler.idle_temp_delta).max(0.0))
    }

    fn enter(
        &self,
        interval: &UsageInterval,
        settings: &ToolSettings,
        heater: &mut ToolHeater,
        schedule: &mut Schedule,
    ) {
        if matches!(heater.state, HeaterState::Off | HeaterState::Idle) {
            let Some(active) = self.active_temperature(interval.tool, settings, interval.start_index) else {
                tracing::debug!("T{}: no active temperature for use at line {}", interval.tool, self.timeline.line_number(interval.start_index));
                return;
            };
            let lead = settings.ramp_time.unwrap_or(0.0);
            let (floor_time, floor_position) = heater.last_event.unwrap_or((0.0, 0));
            let time = (interval.start_time - lead).max(floor_time);
            let position = self
                .timeline
                .position_at(time)
                .max(floor_position)
                .min(interval.start_index);
            tracing::debug!(
                "T{}: preheat to {} at t={:.2} (use starts t={:.2}, line {})",
                interval.tool,
                active,
                time,
                interval.start_time,
                self.timeline.line_number(interval.start_index)
            );
            schedule.events.push(ScheduledEvent { time, position, tool: interval.tool, kind: EventKind::PreheatStart, target: active });
            heater.set(schedule, interval.tool, position, HeaterState::Preheating);
            heater.last_event = Some((time, position));
        }
        if heater.state != HeaterState::Active {
            heater.set(schedule, interval.tool, interval.start_index, HeaterState::Active);
        }
    }

    /// Right after the `Tn` that switches away, or after the last extrusion
    /// when the stream ends with this tool. A `Tn` into an unmanaged tool is
    /// left as the first line of its toolchange, so the event goes before it.
    fn leave_position(&self, interval: &UsageInterval, managed: &BTreeSet<u32>) -> usize {
        match interval.end_index {
            None => interval.last_extrusion_index + 1,
            Some(index) => match self.timeline.tool_change_at(index) {
                Some(change) if !managed.contains(&change.to) => index,
                _ => index + 1,
            },
        }
    }

    /// Returns `false` when the tool is held warm instead of transitioning.
    fn leave(
        &self,
        interval: &UsageInterval,
        position: usize,
        settings: &ToolSettings,
        heater: &mut ToolHeater,
        schedule: &mut Schedule,
    ) -> bool {
        let time = interval.end_time;

        let Some(next) = self.timeline.next_use(interval.tool, interval.end_time) else {
            tracing::debug!("T{}: last use ends at line {}, disabling", interval.tool, self.timeline.line_number(position.saturating_sub(1)));
            schedule.events.push(ScheduledEvent { time, position, tool: interval.tool, kind: EventKind::Disable, target: 0.0 });
            heater.set(schedule, interval.tool, position, HeaterState::Off);
            heater.last_event = Some((time, position));
            return true;
        };

        let gap = next.start_time - interval.end_time;
        let ramp = settings.ramp_time.unwrap_or(0.0);
        // At or below `ramp` the preheat would overlap this use; below the
        // threshold idling is not worth the reheat.
        let lead = settings.idle_threshold.max(ramp + settings.cool_time.unwrap_or(0.0));
        if gap <= lead {
            tracing::debug!("T{}: next use in {:.2} (lead {:.2}), holding temperature", interval.tool, gap, lead);
            return false;
        }

        let Some(active) = self.active_temperature(interval.tool, settings, next.start_index) else {
            return false;
        };
        let target = self.idle_temperature(settings, active);
        tracing::debug!("T{}: next use in {:.2}, idling at {}", interval.tool, gap, target);
        schedule.events.push(ScheduledEvent { time, position, tool: interval.tool, kind: EventKind::IdleTransition, target });
        heater.set(schedule, interval.tool, position, HeaterState::Idle);
        heater.last_event = Some((time, position));
        true
    }
}

/// A preheat and an idle for the same tool in the same slot: the preheat
/// wins. Returns how many idles were dropped.
fn resolve_ties(schedule: &mut Schedule) -> usize {
    let preheats: BTreeSet<(u32, usize)> = schedule
        .events
        .iter()
        .filter(|e| e.kind == EventKind::PreheatStart)
        .map(|e| (e.tool, e.position))
        .collect();
    let before = schedule.events.len();
    schedule
        .events
        .retain(|e| !(e.kind == EventKind::IdleTransition && preheats.contains(&(e.tool, e.position))));
    schedule
        .transitions
        .retain(|t| !(t.state == HeaterState::Idle && preheats.contains(&(t.tool, t.position))));
    before - schedule.events.len()
}
