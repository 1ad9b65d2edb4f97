//! Errors surfaced by the command line driver.

use optx_core::error::OptimizerError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to render the result: {0}")]
    Output(#[from] serde_json::Error),

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}

pub type CliResult<T> = std::result::Result<T, CliError>;
