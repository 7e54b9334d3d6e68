//! Operator model: one tagged variant per dataflow operator.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use common::CacheMode;

use crate::error::{PlanError, SchemaError};
use crate::expr::{GeneratorExpr, Predicate, Ref};
use crate::nfa::{Nfa, SkipStrategy};
use crate::plan::DataflowPlan;
use crate::schema::{BagType, Field, Schema, TupleType};
use crate::types::FieldType;

/// Sort key with direction for `ORDER BY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub key: Ref,
    pub ascending: bool,
}

impl fmt::Display for OrderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.key,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

/// Window extent unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    Rows,
    Seconds,
    Minutes,
}

impl fmt::Display for WindowUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowUnit::Rows => write!(f, "ROWS"),
            WindowUnit::Seconds => write!(f, "SECONDS"),
            WindowUnit::Minutes => write!(f, "MINUTES"),
        }
    }
}

/// Range and optional slide of a `WINDOW` operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub size: u64,
    pub unit: WindowUnit,
    pub slide: Option<(u64, WindowUnit)>,
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.size, self.unit)?;
        if let Some((n, unit)) = &self.slide {
            write!(f, " SLIDE {} {}", n, unit)?;
        }
        Ok(())
    }
}

/// Body of a `FOREACH`: a flat generate list or a nested sub-plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generator {
    List(Vec<GeneratorExpr>),
    Plan(Vec<Operator>),
}

/// The operator-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Load {
        file: PathBuf,
        given_schema: Option<Schema>,
        /// Loader function; `BinStorage` for cached materializations.
        loader: Option<String>,
        /// Modification time of `file`, resolved by the driver when profiling
        /// is enabled so that file edits invalidate cached materializations.
        last_modified: Option<i64>,
    },
    Filter {
        pred: Predicate,
    },
    Foreach {
        gen: Generator,
        /// Constructed from `Generator::Plan` during plan preparation.
        #[serde(skip)]
        subplan: Option<Box<DataflowPlan>>,
    },
    Grouping {
        keys: Vec<Ref>,
    },
    Join {
        /// One key list per input relation; arities must agree.
        keys: Vec<Vec<Ref>>,
    },
    Union,
    Distinct,
    OrderBy {
        keys: Vec<OrderSpec>,
    },
    Limit {
        n: u64,
    },
    Split {
        /// One predicate per output pipe, applied positionally.
        preds: Vec<Predicate>,
    },
    Store {
        file: PathBuf,
        storer: Option<String>,
    },
    Dump,
    /// User hint; replaced by the materialization manager during rewriting.
    Materialize,
    Cache {
        mode: CacheMode,
    },
    Window {
        spec: WindowSpec,
    },
    /// A relational operator rewritten onto a stream window (flinks backend).
    Windowed {
        spec: WindowSpec,
        inner: Box<OpKind>,
    },
    Matcher {
        nfa: Nfa,
        skip: SkipStrategy,
    },
    /// Final statement of a nested FOREACH plan.
    Generate {
        exprs: Vec<GeneratorExpr>,
    },
    /// Builds a bag from a tuple component inside a nested FOREACH.
    ConstructBag {
        expr: Ref,
        /// Back-reference to the enclosing FOREACH input schema, installed
        /// during plan preparation so `DerefTuple` expressions resolve.
        #[serde(skip)]
        parent_schema: Option<Schema>,
    },
    /// Profiling shim tagging each record with lineage and partition id.
    TimingOp {
        lineage: String,
    },
    /// Auxiliary jar registration; extracted during plan assembly.
    Register {
        jar: String,
    },
}

/// A node of the dataflow plan: payload plus pipe wiring and schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    /// Input pipe names, ordered. Order is positional for `Join`.
    inputs: Vec<String>,
    /// Output pipe names; one for most operators, several for `Split`,
    /// none for sinks.
    outputs: Vec<String>,
    /// Output schema, filled in by `construct_schema`.
    schema: Option<Schema>,
    kind: OpKind,
}

impl Operator {
    pub fn new(kind: OpKind, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        // The parser encodes "sink" as the empty initial out pipe name.
        let outputs = outputs.into_iter().filter(|o| !o.is_empty()).collect();
        Self {
            inputs,
            outputs,
            schema: None,
            kind,
        }
    }

    // === Convenience constructors (the shapes the parser produces) ===

    pub fn load(out: &str, file: &str, schema: Option<Schema>) -> Self {
        Self::new(
            OpKind::Load {
                file: PathBuf::from(file),
                given_schema: schema,
                loader: None,
                last_modified: None,
            },
            vec![],
            vec![out.to_string()],
        )
    }

    pub fn filter(out: &str, input: &str, pred: Predicate) -> Self {
        Self::new(
            OpKind::Filter { pred },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn foreach(out: &str, input: &str, gen: Generator) -> Self {
        Self::new(
            OpKind::Foreach { gen, subplan: None },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn grouping(out: &str, input: &str, keys: Vec<Ref>) -> Self {
        Self::new(
            OpKind::Grouping { keys },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn join(out: &str, inputs: Vec<&str>, keys: Vec<Vec<Ref>>) -> Self {
        Self::new(
            OpKind::Join { keys },
            inputs.into_iter().map(|s| s.to_string()).collect(),
            vec![out.to_string()],
        )
    }

    pub fn union(out: &str, inputs: Vec<&str>) -> Self {
        Self::new(
            OpKind::Union,
            inputs.into_iter().map(|s| s.to_string()).collect(),
            vec![out.to_string()],
        )
    }

    pub fn distinct(out: &str, input: &str) -> Self {
        Self::new(
            OpKind::Distinct,
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn order_by(out: &str, input: &str, keys: Vec<OrderSpec>) -> Self {
        Self::new(
            OpKind::OrderBy { keys },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn limit(out: &str, input: &str, n: u64) -> Self {
        Self::new(
            OpKind::Limit { n },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn split(outs: Vec<&str>, input: &str, preds: Vec<Predicate>) -> Self {
        Self::new(
            OpKind::Split { preds },
            vec![input.to_string()],
            outs.into_iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn store(input: &str, file: &str) -> Self {
        Self::new(
            OpKind::Store {
                file: PathBuf::from(file),
                storer: None,
            },
            vec![input.to_string()],
            vec![],
        )
    }

    pub fn dump(input: &str) -> Self {
        Self::new(OpKind::Dump, vec![input.to_string()], vec![])
    }

    pub fn materialize_hint(out: &str, input: &str) -> Self {
        Self::new(
            OpKind::Materialize,
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn cache(out: &str, input: &str, mode: CacheMode) -> Self {
        Self::new(
            OpKind::Cache { mode },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn window(out: &str, input: &str, spec: WindowSpec) -> Self {
        Self::new(
            OpKind::Window { spec },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn matcher(out: &str, input: &str, nfa: Nfa, skip: SkipStrategy) -> Self {
        Self::new(
            OpKind::Matcher { nfa, skip },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn generate(out: &str, input: &str, exprs: Vec<GeneratorExpr>) -> Self {
        Self::new(
            OpKind::Generate { exprs },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn construct_bag(out: &str, input: &str, expr: Ref) -> Self {
        Self::new(
            OpKind::ConstructBag {
                expr,
                parent_schema: None,
            },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn timing(out: &str, input: &str, lineage: &str) -> Self {
        Self::new(
            OpKind::TimingOp {
                lineage: lineage.to_string(),
            },
            vec![input.to_string()],
            vec![out.to_string()],
        )
    }

    pub fn register(jar: &str) -> Self {
        Self::new(
            OpKind::Register {
                jar: jar.to_string(),
            },
            vec![],
            vec![],
        )
    }

    // === Accessors ===

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut OpKind {
        &mut self.kind
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn set_schema(&mut self, schema: Option<Schema>) {
        self.schema = schema;
    }

    /// First (usually only) output pipe name.
    pub fn out_pipe(&self) -> Option<&str> {
        self.outputs.first().map(|s| s.as_str())
    }

    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Returns true for operators with exactly one input and one output.
    pub fn is_unary(&self) -> bool {
        self.inputs.len() == 1 && self.outputs.len() == 1
    }

    pub(crate) fn replace_input(&mut self, old: &str, new: &str) {
        for name in &mut self.inputs {
            if name == old {
                *name = new.to_string();
            }
        }
    }

    pub(crate) fn set_inputs(&mut self, inputs: Vec<String>) {
        self.inputs = inputs;
    }

    pub(crate) fn set_outputs(&mut self, outputs: Vec<String>) {
        self.outputs = outputs;
    }

    /// Operator tag as it appears in lineage strings and diagnostics.
    pub fn tag(&self) -> &'static str {
        match &self.kind {
            OpKind::Load { .. } => "LOAD",
            OpKind::Filter { .. } => "FILTER",
            OpKind::Foreach { .. } => "FOREACH",
            OpKind::Grouping { .. } => "GROUPING",
            OpKind::Join { .. } => "JOIN",
            OpKind::Union => "UNION",
            OpKind::Distinct => "DISTINCT",
            OpKind::OrderBy { .. } => "ORDER",
            OpKind::Limit { .. } => "LIMIT",
            OpKind::Split { .. } => "SPLIT",
            OpKind::Store { .. } => "STORE",
            OpKind::Dump => "DUMP",
            OpKind::Materialize => "MATERIALIZE",
            OpKind::Cache { .. } => "CACHE",
            OpKind::Window { .. } => "WINDOW",
            OpKind::Windowed { .. } => "WINDOWED",
            OpKind::Matcher { .. } => "MATCHER",
            OpKind::Generate { .. } => "GENERATE",
            OpKind::ConstructBag { .. } => "CONSTRUCTBAG",
            OpKind::TimingOp { .. } => "TIMING",
            OpKind::Register { .. } => "REGISTER",
        }
    }

    // === Lineage ===

    /// The literal-parameter portion of the lineage string.
    pub fn lineage_params(&self) -> String {
        match &self.kind {
            OpKind::Load {
                file,
                last_modified,
                ..
            } => {
                format!("{}%{}", file.display(), last_modified.unwrap_or(-1))
            }
            OpKind::Filter { pred } => pred.to_string(),
            OpKind::Foreach { gen, .. } => match gen {
                Generator::List(exprs) => exprs.iter().join(","),
                Generator::Plan(ops) => ops
                    .iter()
                    .map(|op| format!("{}%{}", op.tag(), op.lineage_params()))
                    .join("|"),
            },
            OpKind::Grouping { keys } => keys.iter().join(","),
            OpKind::Join { keys } => keys
                .iter()
                .map(|ks| ks.iter().join(","))
                .join("|"),
            OpKind::OrderBy { keys } => keys.iter().join(","),
            OpKind::Limit { n } => n.to_string(),
            OpKind::Split { preds } => preds.iter().join("|"),
            OpKind::Store { file, .. } => file.display().to_string(),
            OpKind::Cache { mode } => mode.storage_level().to_string(),
            OpKind::Window { spec } => spec.to_string(),
            OpKind::Windowed { spec, inner } => {
                let inner_op = Operator::new(*inner.clone(), vec![], vec![]);
                format!("{}%{}%{}", spec, inner_op.tag(), inner_op.lineage_params())
            }
            OpKind::Matcher { nfa, skip } => format!("{}%{:?}", nfa, skip),
            OpKind::Generate { exprs } => exprs.iter().join(","),
            OpKind::ConstructBag { expr, .. } => expr.to_string(),
            OpKind::TimingOp { lineage } => lineage.clone(),
            OpKind::Register { jar } => jar.clone(),
            OpKind::Union | OpKind::Distinct | OpKind::Dump | OpKind::Materialize => String::new(),
        }
    }

    /// Canonical recursive description: tag, literal parameters, then the
    /// producers' lineage strings joined by `%`.
    pub fn lineage_string(&self, input_lineages: &[String]) -> String {
        let mut out = format!("{}%{}%", self.tag(), self.lineage_params());
        out.push_str(&input_lineages.join("%"));
        out
    }

    // === Schema propagation ===

    /// Compute and install this operator's output schema from its inputs.
    pub fn construct_schema(&mut self, input_schemas: &[Option<Schema>]) -> Result<(), PlanError> {
        let first = input_schemas.first().and_then(|s| s.clone());
        let schema = match &mut self.kind {
            OpKind::Load { given_schema, .. } => given_schema.clone(),
            OpKind::Filter { .. }
            | OpKind::Distinct
            | OpKind::Limit { .. }
            | OpKind::OrderBy { .. }
            | OpKind::Window { .. }
            | OpKind::Materialize
            | OpKind::Cache { .. }
            | OpKind::Matcher { .. }
            | OpKind::TimingOp { .. }
            | OpKind::Split { .. }
            | OpKind::Store { .. }
            | OpKind::Dump => first,
            OpKind::Foreach { gen, subplan } => match gen {
                Generator::List(exprs) => {
                    if exprs.is_empty() {
                        return Err(PlanError::EmptyGenerator);
                    }
                    Some(generator_schema(exprs, first.as_ref())?)
                }
                // The nested plan's final GENERATE carries the schema; the
                // sub-plan is built during plan preparation, before this runs.
                Generator::Plan(_) => subplan
                    .as_ref()
                    .and_then(|p| p.sink_schema()),
            },
            OpKind::Generate { exprs } => {
                if exprs.is_empty() {
                    return Err(PlanError::EmptyGenerator);
                }
                Some(generator_schema(exprs, first.as_ref())?)
            }
            OpKind::Grouping { keys } => match &first {
                Some(input) => Some(grouping_schema(
                    keys,
                    input,
                    self.inputs.first().map(|s| s.as_str()).unwrap_or(""),
                )?),
                None => None,
            },
            OpKind::Join { keys } => {
                if keys.len() != input_schemas.len() {
                    return Err(
                        SchemaError::JoinKeyCount(input_schemas.len(), keys.len()).into()
                    );
                }
                if let Some(head) = keys.first() {
                    for ks in keys.iter().skip(1) {
                        if ks.len() != head.len() {
                            return Err(SchemaError::JoinKeyArity(head.len(), ks.len()).into());
                        }
                    }
                }
                if input_schemas.iter().all(|s| s.is_some()) {
                    let fields = input_schemas
                        .iter()
                        .flat_map(|s| s.as_ref().unwrap().fields().iter().cloned())
                        .collect();
                    Some(Schema::from_fields(fields))
                } else {
                    None
                }
            }
            OpKind::Union => {
                if input_schemas.iter().all(|s| s.is_some()) {
                    let head = input_schemas[0].as_ref().unwrap();
                    for other in input_schemas.iter().skip(1) {
                        let other = other.as_ref().unwrap();
                        if !head.compatible(other) && !other.compatible(head) {
                            return Err(SchemaError::IncompatibleUnion(
                                head.signature_string(),
                                other.signature_string(),
                            )
                            .into());
                        }
                    }
                    Some(head.clone())
                } else {
                    None
                }
            }
            OpKind::Windowed { inner, .. } => {
                let mut shim =
                    Operator::new(*inner.clone(), self.inputs.clone(), self.outputs.clone());
                shim.construct_schema(input_schemas)?;
                shim.schema
            }
            OpKind::ConstructBag {
                expr,
                parent_schema,
            } => {
                let base = parent_schema.as_ref().or(first.as_ref());
                match base {
                    Some(schema) => {
                        let ftype = expr.result_type(Some(schema))?;
                        let name = match expr {
                            Ref::DerefTuple(_, component) => component.to_string(),
                            other => other.to_string(),
                        };
                        let inner = TupleType::new(vec![Field::new(&name, ftype)]);
                        Some(Schema::from_fields(vec![Field::new(
                            &name,
                            FieldType::Bag(BagType::new(inner)),
                        )]))
                    }
                    None => None,
                }
            }
            OpKind::Register { .. } => None,
        };
        self.schema = schema;
        Ok(())
    }

    /// Verify field references resolve against the (possibly unknown) input
    /// schemas. With a known schema, named references must resolve; without
    /// one, only positional references are allowed.
    pub fn check_conformance(&self, input_schemas: &[Option<Schema>]) -> Result<(), SchemaError> {
        let first = input_schemas.first().and_then(|s| s.as_ref());
        match &self.kind {
            OpKind::Filter { pred } => pred.check(first),
            OpKind::Foreach { gen, .. } => match gen {
                Generator::List(exprs) => {
                    for e in exprs {
                        e.expr.check(first)?;
                    }
                    Ok(())
                }
                Generator::Plan(_) => Ok(()),
            },
            OpKind::Generate { exprs } => {
                for e in exprs {
                    e.expr.check(first)?;
                }
                Ok(())
            }
            OpKind::Grouping { keys } => {
                for k in keys {
                    k.result_type(first)?;
                }
                Ok(())
            }
            OpKind::Join { keys } => {
                for (ks, schema) in keys.iter().zip(input_schemas) {
                    for k in ks {
                        k.result_type(schema.as_ref())?;
                    }
                }
                Ok(())
            }
            OpKind::OrderBy { keys } => {
                for k in keys {
                    k.key.result_type(first)?;
                }
                Ok(())
            }
            OpKind::Split { preds } => {
                for p in preds {
                    p.check(first)?;
                }
                Ok(())
            }
            OpKind::Matcher { nfa, .. } => nfa.check(first),
            OpKind::Windowed { inner, .. } => {
                let shim =
                    Operator::new(*inner.clone(), self.inputs.clone(), self.outputs.clone());
                shim.check_conformance(input_schemas)
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) -> [{}]",
            self.tag(),
            self.inputs.join(", "),
            self.outputs.join(", ")
        )
    }
}

/// Output schema of a generate list: one field per generator item.
fn generator_schema(
    exprs: &[GeneratorExpr],
    input: Option<&Schema>,
) -> Result<Schema, SchemaError> {
    let mut fields = Vec::with_capacity(exprs.len());
    for (pos, e) in exprs.iter().enumerate() {
        fields.push(e.output_field(input, pos)?);
    }
    Ok(Schema::from_fields(fields))
}

/// Output schema of a grouping: `(group: K, <input pipe>: bag<input tuple>)`.
fn grouping_schema(keys: &[Ref], input: &Schema, in_pipe: &str) -> Result<Schema, SchemaError> {
    let group_type = match keys {
        // GROUP ALL emits the synthetic chararray key "all".
        [] => FieldType::CharArray,
        [single] => single.result_type(Some(input))?,
        several => {
            let mut fields = Vec::with_capacity(several.len());
            for k in several {
                fields.push(Field::new(&k.to_string(), k.result_type(Some(input))?));
            }
            FieldType::Tuple(TupleType::new(fields))
        }
    };
    let bag = FieldType::Bag(input.bag().clone());
    Ok(Schema::from_fields(vec![
        Field::new("group", group_type),
        Field::new(in_pipe, bag),
    ]))
}
