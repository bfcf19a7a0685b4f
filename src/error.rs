use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Conditions that stop a whole run. Per-file failures never do; they are
/// collected into the report.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not a directory: {0}")]
    InvalidBaseDir(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot format report: {0}")]
    Format(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
