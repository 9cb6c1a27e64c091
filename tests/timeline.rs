// Tests for the timeline builder and lookahead queries

use krusty_toolwizard::config::{SchedulerConfig, TimingMode};
use krusty_toolwizard::gcode::parse_program;
use krusty_toolwizard::timeline::{ToolChange, Timeline};

fn build(src: &str, timing: TimingMode) -> Timeline {
    let config = SchedulerConfig { timing, ..Default::default() };
    Timeline::build(&parse_program(src).commands, &config)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

const ESTIMATED: &str = "\
G90
G1 X0 Y0 F6000
T0
G1 X100 Y0 E5
G1 X100 Y0 E4
G92 E0
G1 X100 Y50 E2
T1
M83
G1 X0 Y50 E1 F3000
G4 P500
G1 E0.5
";

#[test]
fn test_estimated_time_from_feed_rate() {
    let timeline = build(ESTIMATED, TimingMode::Estimated);
    assert_eq!(timeline.len(), 12);
    // Commands without a derivable duration cost the default 0.01
    assert!(approx(timeline.stamp(0), 0.0));
    assert!(approx(timeline.stamp(1), 0.01));
    assert!(approx(timeline.stamp(3), 0.03));
    // 100 mm at 6000 mm/min
    assert!(approx(timeline.stamp(4), 1.03));
    // 1 mm retract at 6000 mm/min
    assert!(approx(timeline.stamp(5), 1.04));
    // 50 mm at 6000 mm/min
    assert!(approx(timeline.stamp(7), 1.55));
    // 100 mm at 3000 mm/min, then a 0.5 s dwell
    assert!(approx(timeline.stamp(10), 3.57));
    assert!(approx(timeline.stamp(11), 4.07));
    assert!(approx(timeline.end_time(), 4.08));
}

#[test]
fn test_extrusion_detection() {
    let timeline = build(ESTIMATED, TimingMode::Estimated);
    let extruding: Vec<usize> = (0..timeline.len()).filter(|&i| timeline.is_extrusion(i)).collect();
    // Retract on line 5 does not count; G92 resets E; relative E after M83
    assert_eq!(extruding, vec![3, 6, 9, 11]);
}

#[test]
fn test_usage_intervals() {
    let timeline = build(ESTIMATED, TimingMode::Estimated);
    let intervals = timeline.intervals();
    assert_eq!(intervals.len(), 2);

    let t0 = &intervals[0];
    assert_eq!(t0.tool, 0);
    assert_eq!(t0.select_index, Some(2));
    assert_eq!(t0.start_index, 3);
    assert_eq!(t0.last_extrusion_index, 6);
    assert_eq!(t0.end_index, Some(7));
    assert!(approx(t0.start_time, 0.03));
    assert!(approx(t0.end_time, 1.55));

    let t1 = &intervals[1];
    assert_eq!(t1.tool, 1);
    assert_eq!(t1.start_index, 9);
    assert_eq!(t1.last_extrusion_index, 11);
    assert_eq!(t1.end_index, None);
    assert!(approx(t1.end_time, timeline.end_time()));

    assert_eq!(
        timeline.tool_changes(),
        &[
            ToolChange { index: 2, from: None, to: 0 },
            ToolChange { index: 7, from: Some(0), to: 1 },
        ]
    );
}

#[test]
fn test_lines_timing_counts_commands() {
    let timeline = build(ESTIMATED, TimingMode::Lines);
    for i in 0..timeline.len() {
        assert!(approx(timeline.stamp(i), i as f64));
    }
    assert!(approx(timeline.end_time(), 12.0));
}

#[test]
fn test_intervals_need_extrusion_and_a_tool() {
    // Extrusion before T0 opens nothing; T1 never extrudes; reselecting T0 keeps the interval open
    let src = "G1 X1 E1\nT0\nG1 X2 E2\nT0\nG1 X3 E3\nT1\nG1 X4\nT0\nG1 X5 E4\n";
    let timeline = build(src, TimingMode::Lines);
    let intervals = timeline.intervals();
    assert_eq!(intervals.len(), 2);
    assert_eq!((intervals[0].tool, intervals[0].start_index, intervals[0].last_extrusion_index), (0, 2, 4));
    assert_eq!(intervals[0].end_index, Some(5));
    assert_eq!((intervals[1].tool, intervals[1].start_index), (0, 8));
    assert_eq!(timeline.intervals_for(1).count(), 0);
    assert_eq!(timeline.tools_used().collect::<Vec<_>>(), vec![0]);
    let selections: Vec<(u32, usize)> = timeline.first_selections().collect();
    assert_eq!(selections, vec![(0, 1), (1, 5)]);
}

#[test]
fn test_next_use_lookahead() {
    let src = "T0\nG1 X1 E1\nT1\nG1 X2 E2\nT0\nG1 X3 E3\nT1\nG1 X4 E4\n";
    let timeline = build(src, TimingMode::Lines);

    let first = timeline.next_use(0, -1.0).unwrap();
    assert_eq!(first.start_index, 1);
    let second = timeline.next_use(0, first.end_time).unwrap();
    assert_eq!(second.start_index, 5);
    assert!(timeline.next_use(0, second.end_time).is_none());

    let t1 = timeline.next_use(1, 0.0).unwrap();
    assert_eq!(t1.start_index, 3);
    assert_eq!(timeline.next_use(1, 3.0).unwrap().start_index, 7);
    assert!(timeline.next_use(7, 0.0).is_none());
    assert_eq!(timeline.intervals_for(1).count(), 2);
}

#[test]
fn test_position_at_is_the_running_command() {
    let timeline = build("T0\nG1 X1 E1\nG1 X2 E2\nG1 X3 E3\n", TimingMode::Lines);
    assert_eq!(timeline.position_at(-5.0), 0);
    assert_eq!(timeline.position_at(0.0), 0);
    // Command 1 runs from 1 to 2
    assert_eq!(timeline.position_at(1.5), 1);
    assert_eq!(timeline.position_at(2.0), 2);
    assert_eq!(timeline.position_at(3.99), 3);
    assert_eq!(timeline.position_at(4.0), 4);
    assert_eq!(timeline.position_at(100.0), 4);
}

#[test]
fn test_position_at_inside_a_long_move() {
    // 0.01 s, 60 s, 0.1 s at 6000 mm/min
    let timeline = build("T0\nG1 X0 F6000\nG1 X6000 E1\nG1 X6010 E2\n", TimingMode::Estimated);
    assert!(approx(timeline.stamp(2), 0.02));
    assert!(approx(timeline.stamp(3), 60.02));
    assert_eq!(timeline.position_at(30.0), 2);
    assert!(timeline.stamp(timeline.position_at(30.0)) <= 30.0);
    assert_eq!(timeline.position_at(60.05), 3);
}

#[test]
fn test_relative_extrusion_survives_absolute_positioning() {
    // Z-hop with G91/G90 while M83 is active
    let src = "M83\nT0\nG1 X1 E0.5 F1200\nG91\nG1 Z0.4\nG90\nT1\nG1 X2 E0.5\nG1 X3 E0.5\n";
    let timeline = build(src, TimingMode::Lines);
    let extruding: Vec<usize> = (0..timeline.len()).filter(|&i| timeline.is_extrusion(i)).collect();
    assert_eq!(extruding, vec![2, 7, 8]);
    let tools: Vec<u32> = timeline.intervals().iter().map(|i| i.tool).collect();
    assert_eq!(tools, vec![0, 1]);
    assert_eq!(timeline.intervals()[1].start_index, 7);
}

#[test]
fn test_g91_makes_extrusion_relative_until_g90() {
    let src = "M82\nT0\nG1 X1 E5\nG91\nG1 E1\nG1 E-2\nG90\nG1 X2 E5\nG1 X3 E6\n";
    let timeline = build(src, TimingMode::Lines);
    let extruding: Vec<usize> = (0..timeline.len()).filter(|&i| timeline.is_extrusion(i)).collect();
    // E: 5, +1, -2 -> 4, then absolute 5 and 6
    assert_eq!(extruding, vec![2, 4, 7, 8]);
}

#[test]
fn test_tool_change_at() {
    let timeline = build("T0\nG1 X1 E1\nT0\nT1\nG1 X2 E2\n", TimingMode::Lines);
    assert_eq!(timeline.tool_change_at(3), Some(&ToolChange { index: 3, from: Some(0), to: 1 }));
    assert_eq!(timeline.tool_change_at(0), Some(&ToolChange { index: 0, from: None, to: 0 }));
    // Reselecting the active tool is not a change
    assert_eq!(timeline.tool_change_at(2), None);
    assert_eq!(timeline.tool_change_at(1), None);
}

#[test]
fn test_heater_targets_resolve_active_tool() {
    let src = "M104 S180\nT1\nM109 S230\nM104 T0 S0\nT0\nM104 S210\n";
    let timeline = build(src, TimingMode::Lines);
    let targets: Vec<(usize, u32, f64)> = timeline.heater_targets().iter().map(|h| (h.index, h.tool, h.target)).collect();
    // The first M104 has no tool to resolve to
    assert_eq!(targets, vec![(2, 1, 230.0), (3, 0, 0.0), (5, 0, 210.0)]);
}
