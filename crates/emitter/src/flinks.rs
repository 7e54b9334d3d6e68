//! Streaming backend emission: DataStream operator chains with windowed
//! variants for the relational operators.

use petgraph::graph::NodeIndex;

use dataflow::{
    DataflowPlan, Generator, Nfa, OpKind, Operator, Ref, Schema, WindowSpec, WindowUnit,
};

use crate::error::BackendError;
use crate::scala::{
    cep_helper_name, gen_nested_block, render_expr, render_predicate, render_ref,
    schema_class_name,
};

pub const BACKEND_NAME: &str = "flinks";

fn missing(tag: &'static str) -> BackendError {
    BackendError::MissingTemplate {
        backend: BACKEND_NAME,
        tag,
    }
}

fn input_schema(plan: &DataflowPlan, op: &Operator, i: usize) -> Option<Schema> {
    let name = op.inputs().get(i)?;
    let producer = plan.find_operator_for_alias(name)?;
    plan.node(producer).schema().cloned()
}

/// `Time.seconds(n)` / count expression for a window extent.
fn window_extent(size: u64, unit: WindowUnit) -> String {
    match unit {
        WindowUnit::Rows => size.to_string(),
        WindowUnit::Seconds => format!("Time.seconds({})", size),
        WindowUnit::Minutes => format!("Time.minutes({})", size),
    }
}

fn window_args(spec: &WindowSpec) -> String {
    let mut args = window_extent(spec.size, spec.unit);
    if let Some((n, unit)) = &spec.slide {
        args.push_str(", ");
        args.push_str(&window_extent(*n, *unit));
    }
    args
}

/// Render the snippet for one operator.
pub fn emit_operator(plan: &DataflowPlan, idx: NodeIndex) -> Result<String, BackendError> {
    let op = plan.node(idx);
    let out = op.out_pipe().unwrap_or_default().to_string();
    match op.kind() {
        OpKind::Load {
            file, given_schema, ..
        } => Ok(gen_load(
            &out,
            &file.display().to_string(),
            given_schema.as_ref().or(op.schema()),
        )),
        OpKind::Filter { pred } => {
            let schema = input_schema(plan, op, 0);
            Ok(format!(
                "val {} = {}.filter(t => {})",
                out,
                op.inputs()[0],
                render_predicate(pred, schema.as_ref())
            ))
        }
        OpKind::Foreach { gen, subplan } => match gen {
            Generator::List(exprs) => {
                let schema = input_schema(plan, op, 0);
                let class = op.schema().map(schema_class_name).ok_or_else(|| {
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
            Ok(format!(
                "val {} = {}.keyBy(t => {})",
                out,
                op.inputs()[0],
                grouping_key(keys, schema.as_ref())
            ))
        }
        OpKind::Union => {
            let rest: Vec<&str> = op.inputs().iter().skip(1).map(|s| s.as_str()).collect();
            Ok(format!(
                "val {} = {}.union({})",
                out,
                op.inputs()[0],
                rest.join(", ")
            ))
        }
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
        OpKind::Store { file, .. } => Ok(format!(
            "{}.writeAsText(\"{}\")",
            op.inputs()[0],
            file.display()
        )),
        OpKind::Dump => Ok(format!("{}.print()", op.inputs()[0])),
        OpKind::Window { spec } => Ok(format!(
            "val {} = {}.timeWindowAll({})",
            out,
            op.inputs()[0],
            window_args(spec)
        )),
        OpKind::Windowed { spec, inner } => {
            gen_windowed(plan, op, &out, spec, inner)
        }
        OpKind::Matcher { .. } => Ok(format!(
            "val {out} = CEP.pattern({input}, {helper}.pattern).select({helper}.output _)",
            out = out,
            input = op.inputs()[0],
            helper = cep_helper_name(&out)
        )),
        OpKind::TimingOp { lineage } => Ok(format!(
            "val {out} = {input}.map(new TimingMapper(\"{lineage}\"))",
            out = out,
            input = op.inputs()[0],
            lineage = lineage
        )),
        OpKind::Cache { .. } => Ok(format!(
            // Streaming pipelines have no persist hint; pass through.
            "val {} = {}",
            out,
            op.inputs()[0]
        )),
        // Unwindowed blocking operators have no streaming template.
        OpKind::Distinct
        | OpKind::OrderBy { .. }
        | OpKind::Limit { .. }
        | OpKind::Join { .. } => Err(missing(op.tag())),
        OpKind::Materialize
        | OpKind::Generate { .. }
        | OpKind::ConstructBag { .. }
        | OpKind::Register { .. } => Err(missing(op.tag())),
    }
}

fn grouping_key(keys: &[Ref], schema: Option<&Schema>) -> String {
    match keys {
        [] => "\"all\"".to_string(),
        [single] => render_ref(single, schema),
        several => {
            let parts: Vec<String> = several.iter().map(|k| render_ref(k, schema)).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// A relational operator fused onto a stream window.
fn gen_windowed(
    plan: &DataflowPlan,
    op: &Operator,
    out: &str,
    spec: &WindowSpec,
    inner: &OpKind,
) -> Result<String, BackendError> {
    let input = &op.inputs()[0];
    let schema = input_schema(plan, op, 0);
    let args = window_args(spec);
    match inner {
        OpKind::Grouping { keys } => {
            let class = op.schema().map(schema_class_name).ok_or_else(|| {
                BackendError::MissingSchema(format!("windowed GROUP producing {}", out))
            })?;
            Ok(format!(
                "val {out} = {input}.keyBy(t => {key}).timeWindow({args}).apply {{ (k, _, v, out: Collector[{class}]) => out.collect({class}(k, v)) }}",
                out = out,
                input = input,
                key = grouping_key(keys, schema.as_ref()),
                args = args,
                class = class
            ))
        }
        OpKind::Distinct => Ok(format!(
            "val {out} = {input}.timeWindowAll({args}).apply {{ (_, v, out) => v.toSeq.distinct.foreach(out.collect) }}",
            out = out,
            input = input,
            args = args
        )),
        OpKind::Foreach {
            gen: Generator::List(exprs),
            ..
        } => {
            let class = op.schema().map(schema_class_name).ok_or_else(|| {
                BackendError::MissingSchema(format!("windowed FOREACH producing {}", out))
            })?;
            let rendered: Vec<String> = exprs
                .iter()
                .map(|e| render_expr(&e.expr, schema.as_ref()))
                .collect();
            Ok(format!(
                "val {out} = {input}.timeWindowAll({args}).apply {{ (_, v, out) => v.foreach(t => out.collect({class}({exprs}))) }}",
                out = out,
                input = input,
                args = args,
                class = class,
                exprs = rendered.join(", ")
            ))
        }
        OpKind::OrderBy { keys } => {
            let key = keys
                .first()
                .map(|k| render_ref(&k.key, schema.as_ref()))
                .unwrap_or_else(|| "t".to_string());
            Ok(format!(
                "val {out} = {input}.timeWindowAll({args}).apply {{ (_, v, out) => v.toSeq.sortBy(t => {key}).foreach(out.collect) }}",
                out = out,
                input = input,
                args = args,
                key = key
            ))
        }
        OpKind::Join { keys } => {
            let other = op.inputs().get(1).cloned().unwrap_or_default();
            let left_key = keys
                .first()
                .and_then(|ks| ks.first())
                .map(|k| render_ref(k, schema.as_ref()))
                .unwrap_or_else(|| "t".to_string());
            let right_schema = input_schema(plan, op, 1);
            let right_key = keys
                .get(1)
                .and_then(|ks| ks.first())
                .map(|k| render_ref(k, right_schema.as_ref()))
                .unwrap_or_else(|| "t".to_string());
            Ok(format!(
                "val {out} = {input}.join({other}).where(t => {lk}).equalTo(t => {rk}).window(TumblingEventTimeWindows.of({args}))",
                out = out,
                input = input,
                other = other,
                lk = left_key,
                rk = right_key,
                args = args
            ))
        }
        other => Err(missing(Operator::new(other.clone(), vec![], vec![]).tag())),
    }
}

fn gen_load(out: &str, file: &str, schema: Option<&Schema>) -> String {
    match schema {
        Some(schema) => {
            let class = schema_class_name(schema);
            let fields: Vec<String> = schema
                .fields()
                .iter()
                .enumerate()
                .map(|(pos, f)| parse_field(pos, f.ftype()))
                .collect();
            format!(
                "val {} = env.readTextFile(\"{}\").map(line => {{ val cols = line.split(\",\"); {}({}) }})",
                out,
                file,
                class,
                fields.join(", ")
            )
        }
        None => format!("val {} = env.readTextFile(\"{}\")", out, file),
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

/// Helper declarations an operator needs ahead of its snippet.
pub fn emit_helper(plan: &DataflowPlan, idx: NodeIndex) -> Result<Option<String>, BackendError> {
    let op = plan.node(idx);
    let out = op.out_pipe().unwrap_or_default().to_string();
    match op.kind() {
        OpKind::Matcher { nfa, skip } => {
            let schema = input_schema(plan, op, 0);
            Ok(Some(gen_cep_helper(&out, nfa, *skip, schema.as_ref())))
        }
        _ => Ok(None),
    }
}

/// CEP pattern object: states, guarded transitions, and the select function.
fn gen_cep_helper(
    out: &str,
    nfa: &Nfa,
    skip: dataflow::SkipStrategy,
    schema: Option<&Schema>,
) -> String {
    let steps: Vec<String> = nfa
        .transitions
        .iter()
        .map(|t| {
            format!(
                "    .next(\"{}\").where(t => {})",
                t.to,
                render_predicate(&t.predicate, schema)
            )
        })
        .collect();
    let begin = nfa
        .start_state()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| "start".to_string());
    format!(
        "object {name} {{\n  // skip strategy: {skip:?}\n  val pattern = Pattern.begin(\"{begin}\")\n{steps}\n  def output(m: Map[String, Iterable[Any]]) = m\n}}",
        name = cep_helper_name(out),
        skip = skip,
        begin = begin,
        steps = steps.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{CmpOp, Expr, Field, FieldType, Literal, Predicate, Schema, WindowSpec};

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Int),
        ])
    }

    fn ten_second_window() -> WindowSpec {
        WindowSpec {
            size: 10,
            unit: WindowUnit::Seconds,
            slide: None,
        }
    }

    #[test]
    fn emits_stream_chain() {
        let plan = DataflowPlan::new(vec![
            Operator::load("a", "in.csv", Some(xy())),
            Operator::filter(
                "b",
                "a",
                Predicate::Cmp(
                    CmpOp::Gt,
                    Expr::named("x"),
                    Expr::Ref(Ref::Value(Literal::Int(0))),
                ),
            ),
            Operator::dump("b"),
        ])
        .unwrap();

        let load = plan.find_operator_for_alias("a").unwrap();
        assert!(emit_operator(&plan, load)
            .unwrap()
            .contains("env.readTextFile(\"in.csv\")"));
        let sink = plan.sink_nodes()[0];
        assert_eq!(emit_operator(&plan, sink).unwrap(), "b.print()");
    }

    #[test]
    fn unwindowed_distinct_has_no_stream_template() {
        let plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::distinct("d", "a"),
            Operator::dump("d"),
        ])
        .unwrap();
        let distinct = plan.find_operator_for_alias("d").unwrap();
        assert!(matches!(
            emit_operator(&plan, distinct),
            Err(BackendError::MissingTemplate {
                backend: "flinks",
                tag: "DISTINCT"
            })
        ));
    }

    #[test]
    fn windowed_grouping_uses_keyed_window() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::window("w", "a", ten_second_window()),
            Operator::grouping("g", "w", vec![Ref::named("x")]),
            Operator::dump("g"),
        ])
        .unwrap();
        // Fuse the window, as the backend registration rule would.
        let grouping = plan.find_operator_for_alias("g").unwrap();
        let inner = plan.node(grouping).kind().clone();
        *plan.node_mut(grouping).kind_mut() = OpKind::Windowed {
            spec: ten_second_window(),
            inner: Box::new(inner),
        };
        let window = plan.find_operator_for_alias("w").unwrap();
        plan.remove(window, false).unwrap();

        let rendered = emit_operator(&plan, grouping).unwrap();
        assert!(rendered.contains("keyBy(t => t.x)"));
        assert!(rendered.contains("timeWindow(Time.seconds(10))"));
    }

    #[test]
    fn sliding_window_renders_both_extents() {
        let spec = WindowSpec {
            size: 10,
            unit: WindowUnit::Seconds,
            slide: Some((5, WindowUnit::Seconds)),
        };
        assert_eq!(window_args(&spec), "Time.seconds(10), Time.seconds(5)");
    }

    #[test]
    fn cep_helper_renders_pattern_steps() {
        use dataflow::{State, StateKind, Transition};
        let nfa = Nfa::new(
            vec![
                State::new("s0", StateKind::Start),
                State::new("s1", StateKind::Final),
            ],
            vec![Transition {
                from: "s0".into(),
                to: "s1".into(),
                predicate: Predicate::Cmp(
                    CmpOp::Gt,
                    Expr::named("x"),
                    Expr::Ref(Ref::Value(Literal::Int(3))),
                ),
            }],
        );
        let helper = gen_cep_helper("m", &nfa, dataflow::SkipStrategy::NextMatch, Some(&xy()));
        assert!(helper.contains("object cepHelper_m"));
        assert!(helper.contains(".next(\"s1\").where(t => t.x > 3)"));
    }
}
