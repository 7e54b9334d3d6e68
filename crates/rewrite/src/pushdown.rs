//! Predicate pushdown where commutation is semantically safe.

use dataflow::{DataflowPlan, Generator, OpKind, Operator, PlanError, Ref};
use petgraph::graph::NodeIndex;

use crate::rule::RewriteRule;

/// Push a FILTER below a FOREACH projection that preserves every column the
/// predicate references under its original name.
pub struct PushFilterThroughForeach;

impl RewriteRule for PushFilterThroughForeach {
    fn name(&self) -> &'static str {
        "push-filter-through-foreach"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        let pred = match plan.node(node).kind() {
            OpKind::Filter { pred } => pred.clone(),
            _ => return Ok(false),
        };
        let input = match plan.node(node).inputs() {
            [single] => single.clone(),
            _ => return Ok(false),
        };
        let producer = match plan.find_operator_for_alias(&input) {
            Some(p) => p,
            None => return Ok(false),
        };
        // The projection must have no other observers.
        if plan.consumers_of(&input).len() != 1 {
            return Ok(false);
        }
        let exprs = match plan.node(producer).kind() {
            OpKind::Foreach {
                gen: Generator::List(exprs),
                ..
            } => exprs.clone(),
            _ => return Ok(false),
        };
        let foreach_input = match plan.node(producer).inputs() {
            [single] => single.clone(),
            _ => return Ok(false),
        };
        let upstream_schema = plan
            .find_operator_for_alias(&foreach_input)
            .and_then(|p| plan.node(p).schema().cloned());

        // Every referenced field must be projected through unchanged and
        // resolvable upstream.
        for field in pred.referenced_fields() {
            let preserved = exprs.iter().any(|g| {
                matches!(&g.expr, dataflow::Expr::Ref(Ref::Named(n)) if *n == field)
                    && g.alias.as_ref().map(|a| a.name() == field).unwrap_or(true)
            });
            let upstream_has = upstream_schema
                .as_ref()
                .map(|s| s.field(&field).is_some())
                .unwrap_or(false);
            if !preserved || !upstream_has {
                return Ok(false);
            }
        }

        plan.swap(producer, node)?;
        Ok(true)
    }
}

/// Push a FILTER below a UNION by duplicating it onto every input branch.
pub struct PushFilterThroughUnion;

impl RewriteRule for PushFilterThroughUnion {
    fn name(&self) -> &'static str {
        "push-filter-through-union"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        let pred = match plan.node(node).kind() {
            OpKind::Filter { pred } => pred.clone(),
            _ => return Ok(false),
        };
        let input = match plan.node(node).inputs() {
            [single] => single.clone(),
            _ => return Ok(false),
        };
        let producer = match plan.find_operator_for_alias(&input) {
            Some(p) => p,
            None => return Ok(false),
        };
        if !matches!(plan.node(producer).kind(), OpKind::Union) {
            return Ok(false);
        }
        if plan.consumers_of(&input).len() != 1 {
            return Ok(false);
        }

        let branches: Vec<NodeIndex> = plan
            .node(producer)
            .inputs()
            .iter()
            .filter_map(|name| plan.find_operator_for_alias(name))
            .collect();
        if branches.len() != plan.node(producer).inputs().len() {
            return Ok(false);
        }

        for branch in branches {
            let copy = Operator::filter("", "", pred.clone());
            plan.insert_between(branch, producer, copy)?;
        }
        plan.remove(node, false)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{
        CmpOp, Expr, Field, FieldType, GeneratorExpr, Literal, Predicate, Schema,
    };

    fn cmp(op: CmpOp, field: &str, value: i32) -> Predicate {
        Predicate::Cmp(
            op,
            Expr::named(field),
            Expr::Ref(Ref::Value(Literal::Int(value))),
        )
    }

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Int),
        ])
    }

    #[test]
    fn pushes_through_preserving_projection() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::foreach(
                "b",
                "a",
                Generator::List(vec![
                    GeneratorExpr::new(Expr::named("x")),
                    GeneratorExpr::new(Expr::named("y")),
                ]),
            ),
            Operator::filter("c", "b", cmp(CmpOp::Gt, "x", 0)),
            Operator::store("c", "out"),
        ])
        .unwrap();

        let filter = plan.find_operator_for_alias("c").unwrap();
        assert!(PushFilterThroughForeach.apply(&mut plan, filter).unwrap());
        // The filter now reads directly from the load.
        assert_eq!(plan.node(filter).inputs(), ["a"]);
    }

    #[test]
    fn refuses_when_column_is_renamed() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::foreach(
                "b",
                "a",
                Generator::List(vec![GeneratorExpr::with_alias(
                    Expr::named("x"),
                    Field::new("renamed", FieldType::Int),
                )]),
            ),
            Operator::filter("c", "b", cmp(CmpOp::Gt, "renamed", 0)),
            Operator::store("c", "out"),
        ])
        .unwrap();

        let filter = plan.find_operator_for_alias("c").unwrap();
        assert!(!PushFilterThroughForeach.apply(&mut plan, filter).unwrap());
    }

    #[test]
    fn duplicates_filter_over_union() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::load("b", "g", Some(xy())),
            Operator::union("u", vec!["a", "b"]),
            Operator::filter("c", "u", cmp(CmpOp::Gt, "x", 0)),
            Operator::store("c", "out"),
        ])
        .unwrap();

        let filter = plan.find_operator_for_alias("c").unwrap();
        assert!(PushFilterThroughUnion.apply(&mut plan, filter).unwrap());

        let filters = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Filter { .. }))
            .count();
        assert_eq!(filters, 2);
        // The union now feeds the store directly.
        let sink = plan.sink_nodes()[0];
        let union = plan.find_operator_for_alias("u").unwrap();
        assert_eq!(plan.node(sink).inputs(), plan.node(union).outputs());
    }
}
