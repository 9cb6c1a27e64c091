// src/file_manager.rs - G-code and report file I/O
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::ToolWizardError;
use crate::rewriter::RewriteReport;

/// Where rewritten G-code goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `None` and `-` mean stdout.
    pub fn from_arg(path: Option<&Path>) -> Self {
        match path {
            Some(p) if p != Path::new("-") => OutputTarget::File(p.to_path_buf()),
            _ => OutputTarget::Stdout,
        }
    }
}

/// How the input bytes were turned into text. Output is written back the
/// same way, so lines the rewrite does not touch keep their exact bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// Fallback for files that are not valid UTF-8: one char per byte.
    Latin1,
}

impl TextEncoding {
    pub fn decode(bytes: Vec<u8>) -> (String, Self) {
        match String::from_utf8(bytes) {
            Ok(text) => (text, TextEncoding::Utf8),
            Err(e) => {
                let text = e.as_bytes().iter().map(|&b| char::from(b)).collect();
                (text, TextEncoding::Latin1)
            }
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            // Inserted lines are ASCII, everything else came from a byte
            TextEncoding::Latin1 => text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect(),
        }
    }
}

/// A G-code file read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCodeFile {
    pub content: String,
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, Default)]
pub struct FileManager;

impl FileManager {
    pub fn new() -> Self {
        Self
    }

    pub async fn read_gcode_file(&self, path: &Path) -> Result<GCodeFile, ToolWizardError> {
        tracing::info!("Reading G-code file: {}", path.display());
        let bytes = fs::read(path).await.map_err(|e| ToolWizardError::io(path, e))?;
        let (content, encoding) = TextEncoding::decode(bytes);
        if encoding == TextEncoding::Latin1 {
            tracing::warn!("{} is not valid UTF-8, reading it byte for byte", path.display());
        }
        Ok(GCodeFile { content, encoding })
    }

    pub async fn write_gcode(
        &self,
        target: &OutputTarget,
        content: &str,
        encoding: TextEncoding,
    ) -> Result<(), ToolWizardError> {
        let bytes = encoding.encode(content);
        match target {
            OutputTarget::File(path) => {
                tracing::info!("Writing G-code file: {}", path.display());
                fs::write(path, bytes)
                    .await
                    .map_err(|e| ToolWizardError::io(path, e))
            }
            OutputTarget::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout
                    .write_all(&bytes)
                    .await
                    .map_err(|e| ToolWizardError::io("<stdout>", e))?;
                stdout.flush().await.map_err(|e| ToolWizardError::io("<stdout>", e))
            }
        }
    }

    pub async fn write_report(&self, path: &Path, report: &RewriteReport) -> Result<(), ToolWizardError> {
        tracing::info!("Writing report: {}", path.display());
        let json = serde_json::to_string_pretty(report)?;
        fs::write(path, json)
            .await
            .map_err(|e| ToolWizardError::io(path, e))
    }
}
