//! Error types for workflow loading and local runs.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown job '{job}' (available: {available})")]
    UnknownJob { job: String, available: String },

    #[error("job {job} step {index}: {reason}")]
    InvalidStep {
        job: String,
        index: usize,
        reason: String,
    },

    #[error("max-parallel must be at least 1 for job {0}")]
    ZeroParallel(String),

    #[error("step '{step}' could not be started: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CiError>;
