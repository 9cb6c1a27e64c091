// End-to-end rewrite tests

use std::collections::BTreeMap;

use krusty_toolwizard::config::{Config, TimingMode, ToolConfig};
use krusty_toolwizard::gcode::INSERTION_MARKER;
use krusty_toolwizard::scheduler::HeaterState;
use krusty_toolwizard::{rewrite, Warning};

const PRINT: &str = "\
T0
M106 S128
G1 X1 E1
G1 X2 E2
T1
G1 X3 E3
G1 X4 E4
G1 X5 E5
G1 X6 E6
T0
G1 X7 E7
";

fn config() -> Config {
    let mut config = Config::default();
    config.scheduler.timing = TimingMode::Lines;
    config.scheduler.idle_threshold = 2.0;
    config.set_tool(0, ToolConfig { active_temperature: Some(215.0), idle_temperature: Some(150.0), ..Default::default() });
    config.set_tool(1, ToolConfig { active_temperature: Some(240.0), idle_temperature: Some(170.0), ..Default::default() });
    config
}

fn marked(line: &str) -> String {
    format!("{} {}", line, INSERTION_MARKER)
}

fn strip_inserted(output: &str) -> String {
    output
        .split('\n')
        .filter(|line| !line.contains(INSERTION_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_rewrite_inserts_heater_and_fan_commands() {
    let result = rewrite(PRINT, &config());
    let expected = [
        "T0".to_string(),
        "M106 S128".to_string(),
        marked("M104 T0 S215"),
        "G1 X1 E1".to_string(),
        "G1 X2 E2".to_string(),
        "T1".to_string(),
        marked("M106 S128"),
        marked("M104 T0 S150"),
        marked("M104 T1 S240"),
        "G1 X3 E3".to_string(),
        "G1 X4 E4".to_string(),
        "G1 X5 E5".to_string(),
        "G1 X6 E6".to_string(),
        "T0".to_string(),
        marked("M106 S128"),
        marked("M104 T1 S0"),
        marked("M104 T0 S215"),
        "G1 X7 E7".to_string(),
        marked("M104 T0 S0"),
    ]
    .join("\n")
        + "\n";
    assert_eq!(result.output, expected);

    let report = &result.report;
    assert_eq!(report.lines_in, 11);
    assert_eq!(report.lines_out, 19);
    assert_eq!(report.regenerated, 0);
    assert_eq!(report.tool_changes, 2);
    assert_eq!(report.preheats, 3);
    assert_eq!(report.idles, 1);
    assert_eq!(report.disables, 2);
    assert_eq!(report.held, 0);
    assert_eq!(report.fan_reassertions, 2);
    assert_eq!(report.fan_parks, 0);
    assert_eq!(report.final_states, BTreeMap::from([(0, HeaterState::Off), (1, HeaterState::Off)]));
    assert!(report.warnings.is_empty());
}

#[test]
fn test_original_lines_survive_verbatim() {
    let src = "; header\nT0 ; first tool\nM104 S200\nG1 X1 E1 (perimeter)\nT1\n\nG1 X2 E2\nSET_FAN_SPEED FAN=aux SPEED=1\n";
    let result = rewrite(src, &config());
    assert!(result.output.len() > src.len());
    assert_eq!(strip_inserted(&result.output), src);
}

#[test]
fn test_rewrite_is_idempotent() {
    let config = config();
    let first = rewrite(PRINT, &config);
    let second = rewrite(&first.output, &config);
    assert_eq!(second.output, first.output);
    assert_eq!(second.report.regenerated, 8);
    assert_eq!(second.report.lines_in, 19);
    assert_eq!(second.report.preheats, first.report.preheats);
    assert_eq!(second.report.idles, first.report.idles);
}

#[test]
fn test_line_endings_preserved() {
    let config = config();
    let crlf = PRINT.replace('\n', "\r\n");
    let result = rewrite(&crlf, &config);
    assert!(result.output.ends_with("\r\n"));
    assert!(result.output.contains(&format!("{}\r\n", marked("M104 T0 S215"))));
    assert_eq!(strip_inserted(&result.output), crlf);
    assert_eq!(rewrite(&result.output, &config).output, result.output);

    let unterminated = PRINT.trim_end_matches('\n');
    let result = rewrite(unterminated, &config);
    assert!(result.output.ends_with(&marked("M104 T0 S0")));
    assert_eq!(strip_inserted(&result.output), unterminated);
    assert_eq!(rewrite(&result.output, &config).output, result.output);
}

#[test]
fn test_empty_and_toolless_input() {
    let result = rewrite("", &config());
    assert_eq!(result.output, "");
    assert_eq!(result.report.lines_out, 0);

    let src = "G28\nG1 X10 Y10 F3000\nM84\n";
    let result = rewrite(src, &config());
    assert_eq!(result.output, src);
    assert_eq!(result.report.preheats, 0);
    assert!(result.report.final_states.is_empty());
}

#[test]
fn test_warnings_reported_in_line_order() {
    let src = "T0\nG1 X1 E1\nT4\nM104 S2.0.0\nG1 X2 E2\n";
    let result = rewrite(src, &config());
    let warnings = &result.report.warnings;
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0], Warning::UnconfiguredTool { tool: 4, line: 3 });
    assert!(matches!(warnings[1], Warning::ParseDegradation { line: 4, .. }));
    // Processing carries on past both
    assert_eq!(strip_inserted(&result.output), src);
    assert_eq!(result.report.disables, 1);
}

#[test]
fn test_unmanaged_toolchange_keeps_its_lines_together() {
    let src = "T0\nG1 X1 E1\nG1 X2 E2\nT4\nG1 X3 E3\n";
    let result = rewrite(src, &config());
    let lines: Vec<&str> = result.output.lines().collect();
    let t4 = lines.iter().position(|l| *l == "T4").unwrap();
    // The disable for T0 goes before T4, and nothing is inserted after it
    assert_eq!(lines[t4 - 1], marked("M104 T0 S0"));
    assert_eq!(lines[t4 + 1], "G1 X3 E3");
}
