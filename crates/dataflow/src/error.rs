//! Error types for plan construction and schema propagation.

use thiserror::Error;

/// Schema propagation and conformance failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unresolved field '{0}' in schema {1}")]
    UnresolvedField(String, String),
    #[error("named field '{0}' referenced but no schema is known")]
    NamedFieldWithoutSchema(String),
    #[error("position ${0} out of range for schema {1}")]
    PositionOutOfRange(usize, String),
    #[error("type mismatch: {0} is not compatible with {1}")]
    TypeMismatch(String, String),
    #[error("incompatible input schemas for UNION: {0} vs {1}")]
    IncompatibleUnion(String, String),
    #[error("JOIN key lists must match relations: {0} relations, {1} key lists")]
    JoinKeyCount(usize, usize),
    #[error("JOIN key arities differ: {0} vs {1}")]
    JoinKeyArity(usize, usize),
    #[error("cannot dereference into non-composite type {0}")]
    NotComposite(String),
    #[error("schema conformance failed for: {}", .0.join(", "))]
    Conformance(Vec<String>),
}

/// Plan assembly and structural edit failures.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("duplicate pipe '{0}'")]
    DuplicatePipe(String),
    #[error("invalid pipe '{0}'")]
    InvalidPipe(String),
    #[error("empty generator list in FOREACH")]
    EmptyGenerator,
    #[error("nested FOREACH plan must end with GENERATE")]
    MissingGenerate,
    #[error("dangling sub-plan in FOREACH producing '{0}'")]
    DanglingSubPlan(String),
    #[error("dataflow plan is not connected")]
    Disconnected,
    #[error("dataflow plan contains a cycle")]
    Cyclic,
    #[error("FOREACH nesting exceeds the supported depth")]
    NestingTooDeep,
    #[error("operator not found in plan: {0}")]
    UnknownOperator(String),
    #[error("{0} is not a unary operator")]
    NotUnary(String),
    #[error("operators are not adjacent")]
    NotAdjacent,
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
