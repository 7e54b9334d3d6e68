//! Backend code emission for the Hamlet compiler.
//!
//! One emitter per operator variant per backend, schema class synthesis
//! shared across them, and whole-program assembly around the rendered
//! snippets.

mod error;
mod flinks;
mod program;
mod scala;
mod spark;

pub use error::BackendError;
pub use program::{emit_program, EmitConfig};
pub use scala::{schema_class_name, scala_type};
