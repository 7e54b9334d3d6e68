//! Dataflow plan model for the Hamlet compiler.
//!
//! This crate provides the typed operator graph the middle-end works on:
//! the schema and type model, expression trees, the operator variants with
//! their schema propagation and lineage rules, and the `DataflowPlan` with
//! the structural edit primitives used by the rewrite engine.

/// Plan and schema error types.
pub mod error;
/// Expression trees for predicates, generators, and key lists.
pub mod expr;
/// NFA description for the CEP MATCHER operator.
pub mod nfa;
/// Operator variants and their per-operator contracts.
pub mod op;
/// Named edges between operators.
pub mod pipe;
/// The operator graph and its structural edit primitives.
pub mod plan;
/// Bags, tuples, and fields.
pub mod schema;
/// The field type lattice.
pub mod types;

// Re-exported.
pub use error::{PlanError, SchemaError};
pub use expr::{CmpOp, Expr, GeneratorExpr, Literal, Predicate, Ref};
pub use nfa::{Nfa, SkipStrategy, State, StateKind, Transition};
pub use op::{Generator, OpKind, Operator, OrderSpec, WindowSpec, WindowUnit};
pub use pipe::Pipe;
pub use plan::DataflowPlan;
pub use schema::{BagType, Field, Schema, TupleType};
pub use types::FieldType;
