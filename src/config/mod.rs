//! # Tool Wizard Configuration
//!
//! Scheduler and per-tool heater settings, loaded from TOML.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [scheduler]
//! timing = "estimated"
//! idle_threshold = 30.0
//! default_ramp_time = 9.0
//!
//! [tools.T0]
//! active_temperature = 215.0
//! idle_temperature = 150.0
//! ramp_time = 20.0
//!
//! [tools.T1]
//! active_temperature = 240.0
//! ```
//!
//! Tool keys may be written `T0` or `0`. Every field has a default, so an
//! empty file is a valid configuration: temperatures are then inferred from
//! the slicer's own `M104`/`M109` commands.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the timeline measures elapsed time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// Seconds, estimated from feed rates and dwell times.
    #[default]
    Estimated,
    /// One unit per command.
    Lines,
}

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

/// Global scheduling knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub timing: TimingMode,
    /// Cost of a command whose duration cannot be estimated.
    #[serde(default = "default_line_cost")]
    pub line_cost: f64,
    /// Minimum gap before the next use for a tool to be idled instead of held.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: f64,
    /// Ramp time for tools that do not set their own.
    #[serde(default)]
    pub default_ramp_time: Option<f64>,
    /// Idle temperature is `active - idle_temp_delta` when not configured.
    #[serde(default = "default_idle_temp_delta")]
    pub idle_temp_delta: f64,
    #[serde(default = "default_infer_temperatures")]
    pub infer_temperatures: bool,
    #[serde(default)]
    pub park_fan_on_toolchange: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timing: TimingMode::default(),
            line_cost: default_line_cost(),
            idle_threshold: default_idle_threshold(),
            default_ramp_time: None,
            idle_temp_delta: default_idle_temp_delta(),
            infer_temperatures: default_infer_temperatures(),
            park_fan_on_toolchange: false,
        }
    }
}

/// Per-tool heater configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub active_temperature: Option<f64>,
    #[serde(default)]
    pub idle_temperature: Option<f64>,
    #[serde(default)]
    pub ramp_time: Option<f64>,
    #[serde(default)]
    pub cool_time: Option<f64>,
    #[serde(default)]
    pub idle_threshold: Option<f64>,
}

/// Settings for one tool after global defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub active_temperature: Option<f64>,
    pub idle_temperature: Option<f64>,
    pub ramp_time: Option<f64>,
    pub cool_time: Option<f64>,
    pub idle_threshold: f64,
}

// Default value functions
fn default_line_cost() -> f64 { 0.01 }
fn default_idle_threshold() -> f64 { 30.0 }
fn default_idle_temp_delta() -> f64 { 65.0 }
fn default_infer_temperatures() -> bool { true }

/// Parse a tool key (`T0`, `t0` or `0`) into a tool id.
pub fn parse_tool_key(key: &str) -> Option<u32> {
    let digits = key.strip_prefix(['T', 't']).unwrap_or(key);
    digits.parse().ok()
}

impl ToolConfig {
    /// Fields set in `other` win.
    pub fn merged(&self, other: &ToolConfig) -> ToolConfig {
        ToolConfig {
            active_temperature: other.active_temperature.or(self.active_temperature),
            idle_temperature: other.idle_temperature.or(self.idle_temperature),
            ramp_time: other.ramp_time.or(self.ramp_time),
            cool_time: other.cool_time.or(self.cool_time),
            idle_threshold: other.idle_threshold.or(self.idle_threshold),
        }
    }
}

/// Parse a command-line tool override `ID:ACTIVE[:IDLE[:RAMP]]`, e.g. `T1:240:170:15`.
/// Empty fields are left unset (`0::150`).
pub fn parse_tool_spec(s: &str) -> Result<(u32, ToolConfig), String> {
    let mut parts = s.split(':');
    let id = parts
        .next()
        .and_then(parse_tool_key)
        .ok_or_else(|| format!("Invalid tool id in '{}'", s))?;
    let mut fields = [None; 3];
    for (slot, part) in fields.iter_mut().zip(parts.by_ref()) {
        if !part.is_empty() {
            *slot = Some(part.parse::<f64>().map_err(|_| format!("Invalid number '{}' in '{}'", part, s))?);
        }
    }
    if parts.next().is_some() {
        return Err(format!("Too many fields in '{}' (expected ID:ACTIVE[:IDLE[:RAMP]])", s));
    }
    let [active_temperature, idle_temperature, ramp_time] = fields;
    Ok((id, ToolConfig { active_temperature, idle_temperature, ramp_time, ..Default::default() }))
}

impl Config {
    pub fn tool_config(&self, tool: u32) -> Option<&ToolConfig> {
        self.tools
            .iter()
            .find(|(key, _)| parse_tool_key(key) == Some(tool))
            .map(|(_, cfg)| cfg)
    }

    /// Insert or replace a tool's configuration, dropping any alias key.
    pub fn set_tool(&mut self, tool: u32, config: ToolConfig) {
        self.tools.retain(|key, _| parse_tool_key(key) != Some(tool));
        self.tools.insert(format!("T{}", tool), config);
    }

    pub fn tool_settings(&self, tool: u32) -> ToolSettings {
        let cfg = self.tool_config(tool).cloned().unwrap_or_default();
        ToolSettings {
            active_temperature: cfg.active_temperature,
            idle_temperature: cfg.idle_temperature,
            ramp_time: cfg.ramp_time.or(self.scheduler.default_ramp_time),
            cool_time: cfg.cool_time,
            idle_threshold: cfg.idle_threshold.unwrap_or(self.scheduler.idle_threshold),
        }
    }

    /// Validate ranges and tool keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if !(s.line_cost > 0.0) {
            return Err(ConfigError::Invalid("scheduler.line_cost must be > 0".to_string()));
        }
        for (name, value) in [
            ("scheduler.idle_threshold", Some(s.idle_threshold)),
            ("scheduler.default_ramp_time", s.default_ramp_time),
            ("scheduler.idle_temp_delta", Some(s.idle_temp_delta)),
        ] {
            if matches!(value, Some(v) if !(v >= 0.0)) {
                return Err(ConfigError::Invalid(format!("{} must be >= 0", name)));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for (key, tool) in &self.tools {
            let id = parse_tool_key(key)
                .ok_or_else(|| ConfigError::Invalid(format!("tool key '{}' is not a tool number", key)))?;
            if !seen.insert(id) {
                return Err(ConfigError::Invalid(format!("tool T{} is configured more than once", id)));
            }
            for (field, value) in [
                ("active_temperature", tool.active_temperature),
                ("idle_temperature", tool.idle_temperature),
                ("ramp_time", tool.ramp_time),
                ("cool_time", tool.cool_time),
                ("idle_threshold", tool.idle_threshold),
            ] {
                if matches!(value, Some(v) if !(v >= 0.0)) {
                    return Err(ConfigError::Invalid(format!("tools.{}.{} must be >= 0", key, field)));
                }
            }
            if let (Some(active), Some(idle)) = (tool.active_temperature, tool.idle_temperature) {
                if idle > active {
                    return Err(ConfigError::Invalid(format!(
                        "tools.{}: idle_temperature {} exceeds active_temperature {}",
                        key, idle, active
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parse and validate a TOML configuration string.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse_config(&contents) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse config '{}': {}", path.display(), e);
                Err(e)
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}
