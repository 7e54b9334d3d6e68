//! Scala rendering of types, schema classes, and expressions.

use md5::{Digest, Md5};
use std::collections::BTreeMap;

use dataflow::{DataflowPlan, Expr, FieldType, Literal, Predicate, Ref, Schema};

/// Scala type for a schema field.
pub fn scala_type(ftype: &FieldType) -> String {
    match ftype {
        FieldType::ByteArray => "Array[Byte]".to_string(),
        FieldType::Int => "Int".to_string(),
        FieldType::Long => "Long".to_string(),
        FieldType::Float => "Float".to_string(),
        FieldType::Double => "Double".to_string(),
        FieldType::CharArray => "String".to_string(),
        FieldType::Boolean => "Boolean".to_string(),
        FieldType::DateTime => "java.time.Instant".to_string(),
        FieldType::Tuple(t) => {
            schema_class_name(&Schema::from_fields(t.fields().to_vec()))
        }
        FieldType::Bag(b) => format!(
            "Iterable[{}]",
            schema_class_name(&Schema::from_fields(b.tuple().fields().to_vec()))
        ),
        FieldType::Map(v) => format!("Map[String, {}]", scala_type(v)),
    }
}

/// Stable case-class name for a schema.
///
/// Hashing the canonical schema signature means identical schemas share one
/// class across operators, and the name survives recompilation unchanged.
pub fn schema_class_name(schema: &Schema) -> String {
    let digest = format!("{:x}", Md5::digest(schema.signature_string().as_bytes()));
    format!("t{}", &digest[..8])
}

/// Field accessor on the tuple variable `t`.
pub(crate) fn render_ref(r: &Ref, schema: Option<&Schema>) -> String {
    match r {
        Ref::Named(name) => format!("t.{}", name),
        Ref::Positional(pos) => match schema.and_then(|s| s.field_at(*pos)) {
            Some(field) if !field.name().is_empty() => format!("t.{}", field.name()),
            _ => format!("t._{}", pos),
        },
        Ref::Value(lit) => render_literal(lit),
        Ref::DerefTuple(base, component) => {
            let base = render_ref(base, schema);
            match component.as_ref() {
                Ref::Named(name) => format!("{}.{}", base, name),
                Ref::Positional(pos) => format!("{}._{}", base, pos),
                other => format!("{}.{}", base, render_ref(other, None)),
            }
        }
        Ref::DerefMap(base, key) => format!("{}(\"{}\")", render_ref(base, schema), key),
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(v) => v.to_string(),
        Literal::Long(v) => format!("{}L", v),
        Literal::Double(v) => v.to_string(),
        Literal::Chars(v) => format!("\"{}\"", v),
        Literal::Boolean(v) => v.to_string(),
    }
}

/// Scala expression over the tuple variable `t`.
pub fn render_expr(expr: &Expr, schema: Option<&Schema>) -> String {
    match expr {
        Expr::Ref(r) => render_ref(r, schema),
        Expr::Cast(e, t) => format!("({}).asInstanceOf[{}]", render_expr(e, schema), scala_type(t)),
        Expr::Add(l, r) => format!(
            "{} + {}",
            render_expr(l, schema),
            render_expr(r, schema)
        ),
        Expr::Sub(l, r) => format!(
            "{} - {}",
            render_expr(l, schema),
            render_expr(r, schema)
        ),
        Expr::Mul(l, r) => format!(
            "{} * {}",
            render_expr(l, schema),
            render_expr(r, schema)
        ),
        Expr::Div(l, r) => format!(
            "{} / {}",
            render_expr(l, schema),
            render_expr(r, schema)
        ),
        Expr::Func(name, args) => {
            let args: Vec<String> = args.iter().map(|a| render_expr(a, schema)).collect();
            format!("{}({})", name, args.join(", "))
        }
        Expr::Flatten(e) => render_expr(e, schema),
    }
}

/// Scala boolean expression over the tuple variable `t`.
pub fn render_predicate(pred: &Predicate, schema: Option<&Schema>) -> String {
    match pred {
        Predicate::Cmp(op, l, r) => format!(
            "{} {} {}",
            render_expr(l, schema),
            op.target_token(),
            render_expr(r, schema)
        ),
        Predicate::And(l, r) => format!(
            "{} && {}",
            render_predicate(l, schema),
            render_predicate(r, schema)
        ),
        Predicate::Or(l, r) => format!(
            "{} || {}",
            render_predicate(l, schema),
            render_predicate(r, schema)
        ),
        Predicate::Not(p) => format!("!{}", render_predicate(p, schema)),
        Predicate::Paren(p) => format!("({})", render_predicate(p, schema)),
    }
}

/// Deterministic name of a CEP controller object, derived from the
/// referencing operator's out-pipe name.
pub fn cep_helper_name(out: &str) -> String {
    format!("cepHelper_{}", out)
}

/// Render a nested FOREACH plan as a Scala block mapping each outer tuple.
///
/// The nested pipeline runs on in-memory collections, so both backends share
/// this rendering.
pub fn gen_nested_block(
    out: &str,
    input: &str,
    sub: &DataflowPlan,
) -> Result<String, crate::error::BackendError> {
    use crate::error::BackendError;
    use dataflow::OpKind;

    let mut body = Vec::new();
    let mut result = String::new();
    for idx in sub
        .topo_order()
        .map_err(|err| BackendError::Render(err.to_string()))?
    {
        let op = sub.node(idx);
        let line = gen_nested_op(op)?;
        if matches!(op.kind(), OpKind::Generate { .. }) {
            result = line;
        } else {
            body.push(format!("  {}", line));
        }
    }
    Ok(format!(
        "val {out} = {input}.map(t => {{\n{body}\n  {result}\n}})",
        out = out,
        input = input,
        body = body.join("\n"),
        result = result
    ))
}

/// Operators allowed inside a nested FOREACH plan.
fn gen_nested_op(op: &dataflow::Operator) -> Result<String, crate::error::BackendError> {
    use crate::error::BackendError;
    use dataflow::OpKind;

    let out = op.out_pipe().unwrap_or_default();
    match op.kind() {
        OpKind::ConstructBag { expr, .. } => match expr {
            Ref::DerefTuple(base, component) => Ok(format!(
                "val {} = {}.map(t => t.{})",
                out,
                render_ref(base, None),
                component
            )),
            other => Ok(format!("val {} = {}", out, render_ref(other, None))),
        },
        OpKind::Distinct => Ok(format!("val {} = {}.toSeq.distinct", out, op.inputs()[0])),
        OpKind::Filter { pred } => Ok(format!(
            "val {} = {}.filter(t => {})",
            out,
            op.inputs()[0],
            render_predicate(pred, None)
        )),
        OpKind::Limit { n } => Ok(format!("val {} = {}.take({})", out, op.inputs()[0], n)),
        OpKind::OrderBy { .. } => Ok(format!("val {} = {}.toSeq.sorted", out, op.inputs()[0])),
        OpKind::Generate { exprs } => {
            let class = op
                .schema()
                .map(schema_class_name)
                .ok_or_else(|| BackendError::MissingSchema("nested GENERATE".to_string()))?;
            let args: Vec<String> = exprs
                .iter()
                .map(|e| {
                    // Generator expressions range over the nested collections
                    // declared above, not the outer tuple.
                    let rendered = render_expr(&e.expr, None);
                    rendered
                        .strip_prefix("t.")
                        .map(str::to_string)
                        .unwrap_or(rendered)
                })
                .collect();
            Ok(format!("{}({})", class, args.join(", ")))
        }
        _ => Err(BackendError::Render(format!(
            "{} is not allowed inside a nested FOREACH",
            op.tag()
        ))),
    }
}

/// Collect every distinct schema in the plan and declare one case class per
/// signature, nested tuple schemas included.
pub fn schema_class_declarations(plan: &DataflowPlan) -> String {
    let mut classes: BTreeMap<String, String> = BTreeMap::new();
    for (_, op) in plan.operators() {
        if let Some(schema) = op.schema() {
            collect_schema_classes(schema, &mut classes);
        }
    }
    classes
        .values()
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_schema_classes(schema: &Schema, classes: &mut BTreeMap<String, String>) {
    let name = schema_class_name(schema);
    if classes.contains_key(&name) {
        return;
    }
    let fields: Vec<String> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(pos, f)| {
            let field_name = if f.name().is_empty() {
                format!("_{}", pos)
            } else {
                f.name().to_string()
            };
            format!("{}: {}", field_name, scala_type(f.ftype()))
        })
        .collect();
    classes.insert(
        name.clone(),
        format!("case class {}({})", name, fields.join(", ")),
    );
    // Composite fields pull in their own tuple classes.
    for f in schema.fields() {
        match f.ftype() {
            FieldType::Tuple(t) => {
                collect_schema_classes(&Schema::from_fields(t.fields().to_vec()), classes)
            }
            FieldType::Bag(b) => collect_schema_classes(
                &Schema::from_fields(b.tuple().fields().to_vec()),
                classes,
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{CmpOp, Field};

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Double),
        ])
    }

    #[test]
    fn class_names_are_stable_and_shared() {
        let a = schema_class_name(&xy());
        let b = schema_class_name(&xy());
        assert_eq!(a, b);
        assert!(a.starts_with('t'));
        assert_eq!(a.len(), 9);

        let other = Schema::from_fields(vec![Field::new("x", FieldType::Long)]);
        assert_ne!(a, schema_class_name(&other));
    }

    #[test]
    fn renders_named_and_positional_refs() {
        let s = xy();
        assert_eq!(render_ref(&Ref::named("x"), Some(&s)), "t.x");
        assert_eq!(render_ref(&Ref::Positional(1), Some(&s)), "t.y");
        assert_eq!(render_ref(&Ref::Positional(1), None), "t._1");
    }

    #[test]
    fn renders_predicates() {
        let s = xy();
        let pred = Predicate::and(
            Predicate::Cmp(
                CmpOp::Gt,
                Expr::named("x"),
                Expr::Ref(Ref::Value(Literal::Int(0))),
            ),
            Predicate::Cmp(
                CmpOp::Lt,
                Expr::named("y"),
                Expr::Ref(Ref::Value(Literal::Double(5.0))),
            ),
        );
        assert_eq!(render_predicate(&pred, Some(&s)), "(t.x > 0) && (t.y < 5)");
    }

    #[test]
    fn declares_nested_bag_classes() {
        use dataflow::{BagType, TupleType};
        let inner = TupleType::new(vec![Field::new("x", FieldType::Int)]);
        let grouped = Schema::from_fields(vec![
            Field::new("group", FieldType::Int),
            Field::new("a", FieldType::Bag(BagType::new(inner.clone()))),
        ]);
        let mut classes = BTreeMap::new();
        collect_schema_classes(&grouped, &mut classes);
        assert_eq!(classes.len(), 2);
        let inner_name = schema_class_name(&Schema::from_fields(inner.fields().to_vec()));
        let outer = &classes[&schema_class_name(&grouped)];
        assert!(outer.contains(&format!("a: Iterable[{}]", inner_name)));
    }
}
