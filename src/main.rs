// src/main.rs - Command-line entry point
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use krusty_toolwizard::config::{self, Config, TimingMode, ToolConfig};
use krusty_toolwizard::file_manager::{FileManager, OutputTarget};
use krusty_toolwizard::{rewrite, Rewrite, ToolWizardError};

/// Toolchanger G-code post-processor
#[derive(Parser, Debug)]
#[command(
    name = "krusty-toolwizard",
    version,
    about = "Preheat, idle and disable toolchanger heaters ahead of use, and carry the part fan across toolchanges."
)]
pub struct Cli {
    /// Input G-code file
    input: PathBuf,

    /// Output file (`-` or omitted for stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rewrite the input file in place
    #[arg(long, conflicts_with = "output")]
    in_place: bool,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum gap before the next use for a tool to be idled
    #[arg(long)]
    idle_threshold: Option<f64>,

    /// Default preheat lead time for tools without their own
    #[arg(long)]
    ramp_time: Option<f64>,

    /// Idle temperature offset below the active temperature
    #[arg(long)]
    idle_delta: Option<f64>,

    /// How elapsed time is estimated
    #[arg(long, value_enum)]
    timing: Option<TimingArg>,

    /// Cost of a command whose duration cannot be estimated
    #[arg(long)]
    line_cost: Option<f64>,

    /// Tool override ID:ACTIVE[:IDLE[:RAMP]] (repeatable, e.g. --tool T1:240:170:15)
    #[arg(long = "tool", value_parser = config::parse_tool_spec)]
    tools: Vec<(u32, ToolConfig)>,

    /// Stop the part fan before each toolchange
    #[arg(long)]
    park_fan: bool,

    /// Do not infer temperatures from the slicer's M104/M109 commands
    #[arg(long)]
    no_infer: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimingArg {
    Estimated,
    Lines,
}

impl From<TimingArg> for TimingMode {
    fn from(arg: TimingArg) -> Self {
        match arg {
            TimingArg::Estimated => TimingMode::Estimated,
            TimingArg::Lines => TimingMode::Lines,
        }
    }
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        let scheduler = &mut config.scheduler;
        if let Some(v) = self.idle_threshold {
            scheduler.idle_threshold = v;
        }
        if let Some(v) = self.ramp_time {
            scheduler.default_ramp_time = Some(v);
        }
        if let Some(v) = self.idle_delta {
            scheduler.idle_temp_delta = v;
        }
        if let Some(v) = self.timing {
            scheduler.timing = v.into();
        }
        if let Some(v) = self.line_cost {
            scheduler.line_cost = v;
        }
        if self.park_fan {
            scheduler.park_fan_on_toolchange = true;
        }
        if self.no_infer {
            scheduler.infer_temperatures = false;
        }
        for (tool, over) in &self.tools {
            let merged = config.tool_config(*tool).cloned().unwrap_or_default().merged(over);
            config.set_tool(*tool, merged);
        }
    }

    fn output_target(&self) -> OutputTarget {
        if self.in_place {
            OutputTarget::File(self.input.clone())
        } else {
            OutputTarget::from_arg(self.output.as_deref())
        }
    }
}

async fn run(cli: &Cli) -> Result<(), ToolWizardError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    let files = FileManager::new();
    let input = files.read_gcode_file(&cli.input).await?;

    let Rewrite { output, report } = rewrite(&input.content, &config);

    files.write_gcode(&cli.output_target(), &output, input.encoding).await?;
    if let Some(path) = &cli.report {
        files.write_report(path, &report).await?;
    }

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    if !report.warnings.is_empty() {
        tracing::warn!("{} warning(s) while processing {}", report.warnings.len(), cli.input.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    // Stdout carries G-code
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
