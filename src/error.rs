// src/error.rs - Fatal errors and non-fatal run warnings
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Fatal errors. Only the I/O boundary and configuration loading can fail a run.
#[derive(Debug, Error)]
pub enum ToolWizardError {
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Report serialization error: {0}")]
    Report(#[from] serde_json::Error),
}

impl ToolWizardError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Issues recorded while rewriting. They are reported at the end of the run
/// and never stop processing of the remaining stream.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("line {line}: {reason}; passed through unchanged")]
    ParseDegradation { line: usize, reason: String },
    #[error("tool T{tool} (first selected on line {line}) has no known temperature; its toolchanges are left unmanaged")]
    UnconfiguredTool { tool: u32, line: usize },
}

impl Warning {
    /// 1-based line number the warning points at.
    pub fn line(&self) -> usize {
        match self {
            Warning::ParseDegradation { line, .. } => *line,
            Warning::UnconfiguredTool { line, .. } => *line,
        }
    }
}
