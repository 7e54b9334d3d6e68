//! Profiling errors; none of these abort a compilation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilingError {
    #[error("malformed collector message: {0}")]
    MalformedMessage(String),
    #[error("no timing recorded for parent {0} on partition {1}")]
    MissingParent(String, i32),
    #[error("profile serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("collector failed: {0}")]
    Collector(String),
}
