//! Rewriter / emitter.
//!
//! Runs the whole pipeline (parse, timeline, heater schedule, fan carryover)
//! and merges the inserted commands back into the original stream. Original
//! lines are written verbatim and in order; inserted lines carry
//! [`INSERTION_MARKER`] so a later run can strip and regenerate them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::Config;
use crate::error::Warning;
use crate::fan::{FanInsertion, FanInsertionKind, FanTracker};
use crate::gcode::{parse_program, Command, INSERTION_MARKER};
use crate::scheduler::{EventKind, HeaterScheduler, HeaterState, ScheduledEvent};
use crate::timeline::Timeline;

/// Summary of one rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewriteReport {
    pub lines_in: usize,
    pub lines_out: usize,
    /// Lines from an earlier run that were stripped and regenerated.
    pub regenerated: usize,
    pub tool_changes: usize,
    pub preheats: usize,
    pub idles: usize,
    pub disables: usize,
    pub held: usize,
    pub fan_reassertions: usize,
    pub fan_parks: usize,
    pub final_states: BTreeMap<u32, HeaterState>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub output: String,
    pub report: RewriteReport,
}

/// Merges insertions into the source stream.
pub struct Emitter<'a> {
    source: &'a [Command],
    crlf: bool,
    trailing_newline: bool,
}

impl<'a> Emitter<'a> {
    pub fn new(source: &'a [Command], crlf: bool, trailing_newline: bool) -> Self {
        Self { source, crlf, trailing_newline }
    }

    /// Returns the output text and its line count.
    pub fn emit(&self, events: &[ScheduledEvent], fans: &[FanInsertion]) -> (String, usize) {
        let len = self.source.len();
        let mut slots: Vec<Vec<String>> = vec![Vec::new(); len + 1];
        // Fan lines lead their slot, heater events follow in schedule order
        for fan in fans.iter().filter(|f| f.kind == FanInsertionKind::Park) {
            slots[fan.position.min(len)].push(fan.gcode());
        }
        for fan in fans.iter().filter(|f| f.kind == FanInsertionKind::Reassert) {
            slots[fan.position.min(len)].push(fan.gcode());
        }
        for event in events {
            slots[event.position.min(len)].push(event.gcode());
        }

        let cr = if self.crlf { "\r" } else { "" };
        let mut out = String::new();
        let mut count = 0usize;
        let mut push = |line: &str| {
            if count > 0 {
                out.push('\n');
            }
            out.push_str(line);
            count += 1;
        };
        for (slot, command) in slots.iter().zip(self.source.iter().map(Some).chain(std::iter::once(None))) {
            for inserted in slot {
                push(&format!("{} {}{}", inserted, INSERTION_MARKER, cr));
            }
            if let Some(command) = command {
                push(&command.raw);
            }
        }
        if self.trailing_newline && count > 0 {
            out.push('\n');
        }
        (out, count)
    }
}

/// Rewrite a G-code program for the given configuration.
pub fn rewrite(input: &str, config: &Config) -> Rewrite {
    let program = parse_program(input);
    let lines_in = program.commands.len();
    let (generated, source): (Vec<Command>, Vec<Command>) =
        program.commands.into_iter().partition(Command::is_generated);
    if !generated.is_empty() {
        tracing::info!("Regenerating {} lines inserted by an earlier run", generated.len());
    }

    let timeline = Timeline::build(&source, &config.scheduler);
    let schedule = HeaterScheduler::new(config, &timeline).plan();
    let fans = FanTracker::new(&timeline, &schedule, config.scheduler.park_fan_on_toolchange).plan(&source);

    let (output, lines_out) = Emitter::new(&source, program.crlf, program.trailing_newline).emit(&schedule.events, &fans);

    let mut warnings = program.warnings;
    warnings.extend(schedule.warnings.iter().cloned());
    warnings.sort_by_key(Warning::line);

    let report = RewriteReport {
        lines_in,
        lines_out,
        regenerated: generated.len(),
        tool_changes: timeline.tool_changes().iter().filter(|c| c.from.is_some()).count(),
        preheats: schedule.count(EventKind::PreheatStart),
        idles: schedule.count(EventKind::IdleTransition),
        disables: schedule.count(EventKind::Disable),
        held: schedule.held,
        fan_reassertions: fans.iter().filter(|f| f.kind == FanInsertionKind::Reassert).count(),
        fan_parks: fans.iter().filter(|f| f.kind == FanInsertionKind::Park).count(),
        final_states: schedule.final_states.clone(),
        warnings,
    };
    tracing::info!(
        "Rewrote {} lines into {}: {} preheats, {} idles, {} disables, {} fan carryovers",
        report.lines_in,
        report.lines_out,
        report.preheats,
        report.idles,
        report.disables,
        report.fan_reassertions
    );
    Rewrite { output, report }
}
