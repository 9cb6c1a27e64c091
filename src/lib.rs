//! krusty-toolwizard: lookahead heater and fan scheduling for toolchanger G-code.
//!
//! The pipeline is a pure batch transform: [`gcode`] parses lines into
//! commands, [`timeline`] cuts the print into per-tool usage intervals,
//! [`scheduler`] decides preheat/idle/disable events, [`fan`] carries the
//! cooling fan across toolchanges, and [`rewriter`] merges everything back
//! into the original stream.

pub mod config;
pub mod error;
pub mod fan;
pub mod file_manager;
pub mod gcode;
pub mod rewriter;
pub mod scheduler;
pub mod timeline;

pub use config::{Config, ConfigError};
pub use error::{ToolWizardError, Warning};
pub use rewriter::{rewrite, Rewrite, RewriteReport};
