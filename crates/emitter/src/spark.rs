//! Batch backend emission: one generator per operator variant, producing
//! RDD-style operator chains.

use petgraph::graph::NodeIndex;

use dataflow::{
    DataflowPlan, Generator, Nfa, OpKind, Operator, OrderSpec, Predicate, Ref, Schema,
};

use crate::error::BackendError;
use crate::scala::{
    cep_helper_name, gen_nested_block, render_expr, render_predicate, render_ref,
    schema_class_name,
};

pub const BACKEND_NAME: &str = "spark";

fn missing(tag: &'static str) -> BackendError {
    BackendError::MissingTemplate {
        backend: BACKEND_NAME,
        tag,
    }
}

/// Schema of the i-th input pipe, when its producer has one.
fn input_schema(plan: &DataflowPlan, op: &Operator, i: usize) -> Option<Schema> {
    let name = op.inputs().get(i)?;
    let producer = plan.find_operator_for_alias(name)?;
    plan.node(producer).schema().cloned()
}

fn out_class(op: &Operator) -> Option<String> {
    op.schema().map(schema_class_name)
}

/// Render the snippet for one operator.
pub fn emit_operator(plan: &DataflowPlan, idx: NodeIndex) -> Result<String, BackendError> {
    let op = plan.node(idx);
    let out = op.out_pipe().unwrap_or_default().to_string();
    match op.kind() {
        OpKind::Load {
            file,
            loader,
            given_schema,
            ..
        } => Ok(gen_load(
            &out,
            &file.display().to_string(),
            loader.as_deref(),
            given_schema.as_ref().or(op.schema()),
        )),
        OpKind::Filter { pred } => {
            let schema = input_schema(plan, op, 0);
            Ok(gen_filter(&out, &op.inputs()[0], pred, schema.as_ref()))
        }
        OpKind::Foreach { gen, subplan } => match gen {
            Generator::List(exprs) => {
                let schema = input_schema(plan, op, 0);
                let class = out_class(op).ok_or_else(|| {
                    BackendError::MissingSchema(format!("FOREACH producing {}", out))
                })?;
                let args: Vec<String> = exprs
                    .iter()
                    .map(|e| render_expr(&e.expr, schema.as_ref()))
                    .collect();
                Ok(format!(
                    "val {} = {}.map(t => {}({}))",
                    out,
                    op.inputs()[0],
                    class,
                    args.join(", ")
                ))
            }
            Generator::Plan(_) => {
                let sub = subplan
                    .as_deref()
                    .ok_or_else(|| BackendError::Render(format!("unprepared FOREACH {}", out)))?;
                gen_nested_block(&out, &op.inputs()[0], sub)
            }
        },
        OpKind::Grouping { keys } => {
            let schema = input_schema(plan, op, 0);
            let class = out_class(op).ok_or_else(|| {
                BackendError::MissingSchema(format!("GROUP producing {}", out))
            })?;
            Ok(gen_grouping(
                &out,
                &op.inputs()[0],
                keys,
                schema.as_ref(),
                &class,
            ))
        }
        OpKind::Join { keys } => {
            let class = out_class(op).ok_or_else(|| {
                BackendError::MissingSchema(format!("JOIN producing {}", out))
            })?;
            gen_join(plan, op, &out, keys, &class)
        }
        OpKind::Union => {
            let chain: Vec<String> = op.inputs().iter().skip(1).map(|i| format!(".union({})", i)).collect();
            Ok(format!(
                "val {} = {}{}",
                out,
                op.inputs()[0],
                chain.join("")
            ))
        }
        OpKind::Distinct => Ok(format!("val {} = {}.distinct()", out, op.inputs()[0])),
        OpKind::OrderBy { keys } => {
            let schema = input_schema(plan, op, 0);
            Ok(gen_order_by(&out, &op.inputs()[0], keys, schema.as_ref()))
        }
        OpKind::Limit { n } => Ok(format!(
            "val {} = sc.parallelize({}.take({}))",
            out,
            op.inputs()[0],
            n
        )),
        OpKind::Split { preds } => {
            let schema = input_schema(plan, op, 0);
            let lines: Vec<String> = op
                .outputs()
                .iter()
                .zip(preds)
                .map(|(branch, pred)| {
                    format!(
                        "val {} = {}.filter(t => {})",
                        branch,
                        op.inputs()[0],
                        render_predicate(pred, schema.as_ref())
                    )
                })
                .collect();
            Ok(lines.join("\n"))
        }
        OpKind::Store { file, storer } => Ok(gen_store(
            &op.inputs()[0],
            &file.display().to_string(),
            storer.as_deref(),
        )),
        OpKind::Dump => Ok(format!("{}.collect.foreach(println)", op.inputs()[0])),
        OpKind::Cache { mode } => Ok(format!(
            "val {} = {}.persist(StorageLevel.{})",
            out,
            op.inputs()[0],
            mode.storage_level()
        )),
        OpKind::TimingOp { lineage } => Ok(format!(
            "val {out} = {input}.mapPartitionsWithIndex((pid, it) => {{ perf.report(\"{lineage}\", pid); it }}, preservesPartitioning = true)",
            out = out,
            input = op.inputs()[0],
            lineage = lineage
        )),
        OpKind::Matcher { .. } => {
            Ok(format!(
                "val {out} = {input}.mapPartitions(it => {helper}.run(it))",
                out = out,
                input = op.inputs()[0],
                helper = cep_helper_name(&out)
            ))
        }
        OpKind::Window { .. } | OpKind::Windowed { .. } => Err(missing(op.tag())),
        OpKind::Materialize
        | OpKind::Generate { .. }
        | OpKind::ConstructBag { .. }
        | OpKind::Register { .. } => Err(missing(op.tag())),
    }
}

fn gen_load(out: &str, file: &str, loader: Option<&str>, schema: Option<&Schema>) -> String {
    match (loader, schema) {
        (Some("BinStorage"), Some(schema)) => format!(
            "val {} = sc.objectFile[{}](\"{}\")",
            out,
            schema_class_name(schema),
            file
        ),
        (_, Some(schema)) => {
            let class = schema_class_name(schema);
            let fields: Vec<String> = schema
                .fields()
                .iter()
                .enumerate()
                .map(|(pos, f)| parse_field(pos, f.ftype()))
                .collect();
            format!(
                "val {} = sc.textFile(\"{}\").map(line => {{ val cols = line.split(\",\"); {}({}) }})",
                out,
                file,
                class,
                fields.join(", ")
            )
        }
        (_, None) => format!("val {} = sc.textFile(\"{}\")", out, file),
    }
}

fn parse_field(pos: usize, ftype: &dataflow::FieldType) -> String {
    use dataflow::FieldType::*;
    match ftype {
        Int => format!("cols({}).toInt", pos),
        Long => format!("cols({}).toLong", pos),
        Float => format!("cols({}).toFloat", pos),
        Double => format!("cols({}).toDouble", pos),
        Boolean => format!("cols({}).toBoolean", pos),
        _ => format!("cols({})", pos),
    }
}

fn gen_filter(out: &str, input: &str, pred: &Predicate, schema: Option<&Schema>) -> String {
    format!(
        "val {} = {}.filter(t => {})",
        out,
        input,
        render_predicate(pred, schema)
    )
}

fn gen_grouping(
    out: &str,
    input: &str,
    keys: &[Ref],
    schema: Option<&Schema>,
    class: &str,
) -> String {
    let key = match keys {
        [] => "\"all\"".to_string(),
        [single] => render_ref(single, schema),
        several => {
            let parts: Vec<String> = several.iter().map(|k| render_ref(k, schema)).collect();
            format!("({})", parts.join(", "))
        }
    };
    format!(
        "val {out} = {input}.groupBy(t => {key}).map{{ case (k, v) => {class}(k, v) }}",
        out = out,
        input = input,
        key = key,
        class = class
    )
}

fn gen_join(
    plan: &DataflowPlan,
    op: &Operator,
    out: &str,
    keys: &[Vec<Ref>],
    class: &str,
) -> Result<String, BackendError> {
    let mut lines = Vec::new();
    for (i, key_list) in keys.iter().enumerate() {
        let schema = input_schema(plan, op, i);
        let key = match key_list.as_slice() {
            [single] => render_ref(single, schema.as_ref()),
            several => {
                let parts: Vec<String> =
                    several.iter().map(|k| render_ref(k, schema.as_ref())).collect();
                format!("({})", parts.join(", "))
            }
        };
        lines.push(format!(
            "val {out}_kv{i} = {input}.keyBy(t => {key})",
            out = out,
            i = i,
            input = op.inputs()[i],
            key = key
        ));
    }

    // Chained joins nest the value tuples on the left.
    let mut chain = format!("{}_kv0", out);
    for i in 1..keys.len() {
        chain = format!("{}.join({}_kv{})", chain, out, i);
    }
    let mut pattern = "v0".to_string();
    for i in 1..keys.len() {
        pattern = format!("({}, v{})", pattern, i);
    }
    // Concatenate every input's fields positionally.
    let mut args = Vec::new();
    for i in 0..keys.len() {
        let schema = input_schema(plan, op, i)
            .ok_or_else(|| BackendError::MissingSchema(format!("JOIN input {}", i)))?;
        for field in schema.fields() {
            args.push(format!("v{}.{}", i, field.name()));
        }
    }
    lines.push(format!(
        "val {out} = {chain}.map{{ case (_, {pattern}) => {class}({args}) }}",
        out = out,
        chain = chain,
        pattern = pattern,
        class = class,
        args = args.join(", ")
    ));
    Ok(lines.join("\n"))
}

fn gen_order_by(out: &str, input: &str, keys: &[OrderSpec], schema: Option<&Schema>) -> String {
    match keys {
        [single] => format!(
            "val {} = {}.sortBy(t => {}, ascending = {})",
            out,
            input,
            render_ref(&single.key, schema),
            single.ascending
        ),
        _ => format!(
            "val {out} = {input}.sortBy(t => t)({helper}.ordering, implicitly)",
            out = out,
            input = input,
            helper = order_helper_name(out)
        ),
    }
}

fn gen_store(input: &str, file: &str, storer: Option<&str>) -> String {
    match storer {
        Some("BinStorage") => format!("{}.saveAsObjectFile(\"{}\")", input, file),
        _ => format!(
            "{}.map(t => t.productIterator.mkString(\",\")).saveAsTextFile(\"{}\")",
            input, file
        ),
    }
}

// === Helper objects, one per referencing operator ===

pub fn order_helper_name(out: &str) -> String {
    format!("orderHelper_{}", out)
}

/// Helper declarations an operator needs ahead of its snippet.
pub fn emit_helper(plan: &DataflowPlan, idx: NodeIndex) -> Result<Option<String>, BackendError> {
    let op = plan.node(idx);
    let out = op.out_pipe().unwrap_or_default().to_string();
    match op.kind() {
        OpKind::OrderBy { keys } if keys.len() > 1 => {
            let schema = input_schema(plan, op, 0);
            let class = op
                .schema()
                .map(schema_class_name)
                .ok_or_else(|| BackendError::MissingSchema(format!("ORDER producing {}", out)))?;
            let parts: Vec<String> = keys
                .iter()
                .map(|k| render_ref(&k.key, schema.as_ref()))
                .collect();
            Ok(Some(format!(
                "object {name} {{\n  val ordering: Ordering[{class}] = Ordering.by(t => ({keys}))\n}}",
                name = order_helper_name(&out),
                class = class,
                keys = parts.join(", ")
            )))
        }
        OpKind::Matcher { nfa, skip } => {
            let schema = input_schema(plan, op, 0);
            Ok(Some(gen_cep_helper(&out, nfa, *skip, schema.as_ref())))
        }
        _ => Ok(None),
    }
}

/// NFA controller object: states, guarded transitions, and a run loop.
fn gen_cep_helper(
    out: &str,
    nfa: &Nfa,
    skip: dataflow::SkipStrategy,
    schema: Option<&Schema>,
) -> String {
    let states: Vec<String> = nfa
        .states
        .iter()
        .map(|s| format!("  val {} = State(\"{}\", {:?})", s.name, s.name, s.kind))
        .collect();
    let transitions: Vec<String> = nfa
        .transitions
        .iter()
        .map(|t| {
            format!(
                "  addTransition({}, {}, t => {})",
                t.from,
                t.to,
                render_predicate(&t.predicate, schema)
            )
        })
        .collect();
    format!(
        "object {name} extends NfaController {{\n{states}\n{transitions}\n  override val skipStrategy = \"{skip:?}\"\n}}",
        name = cep_helper_name(out),
        states = states.join("\n"),
        transitions = transitions.join("\n"),
        skip = skip
    )
}
