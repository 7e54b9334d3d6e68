//! Top-level compilation errors.

use thiserror::Error;

use dataflow::{PlanError, SchemaError};
use emitter::BackendError;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("cannot read script: {0}")]
    Script(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
