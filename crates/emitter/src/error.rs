//! Emission and backend failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend '{backend}' has no template for operator {tag}")]
    MissingTemplate {
        backend: &'static str,
        tag: &'static str,
    },
    #[error("template rendering failed: {0}")]
    Render(String),
    #[error("cannot emit {0} without a schema")]
    MissingSchema(String),
    #[error("backend runner failed with status {0}")]
    Runner(i32),
}
