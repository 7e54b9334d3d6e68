//! Merge adjacent FILTER operators into one conjunction.

use dataflow::{DataflowPlan, OpKind, PlanError, Predicate};
use petgraph::graph::NodeIndex;

use crate::rule::RewriteRule;

/// `FILTER p1` followed by `FILTER p2` becomes `FILTER (p1) AND (p2)`.
///
/// Only fires when the downstream filter is the sole consumer of the
/// upstream one, so no other branch observes the unmerged stream.
pub struct FilterMerge;

impl RewriteRule for FilterMerge {
    fn name(&self) -> &'static str {
        "filter-merge"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        let downstream = match plan.node(node).kind() {
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
        let upstream = match plan.node(producer).kind() {
            OpKind::Filter { pred } => pred.clone(),
            _ => return Ok(false),
        };
        if plan.consumers_of(&input).len() != 1 {
            return Ok(false);
        }

        if let OpKind::Filter { pred } = plan.node_mut(producer).kind_mut() {
            *pred = Predicate::and(upstream, downstream);
        }
        plan.remove(node, false)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{CmpOp, Expr, Field, FieldType, Literal, Operator, Ref, Schema};

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
    fn merges_adjacent_filters() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("b", "a", cmp(CmpOp::Gt, "x", 0)),
            Operator::filter("c", "b", cmp(CmpOp::Lt, "y", 5)),
            Operator::store("c", "out"),
        ])
        .unwrap();

        let second = plan.find_operator_for_alias("c").unwrap();
        assert!(FilterMerge.apply(&mut plan, second).unwrap());

        let filters: Vec<_> = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Filter { .. }))
            .collect();
        assert_eq!(filters.len(), 1);
        let OpKind::Filter { pred } = filters[0].1.kind() else {
            unreachable!()
        };
        assert_eq!(pred.to_string(), "(x > 0) AND (y < 5)");
    }

    #[test]
    fn leaves_branched_filters_alone() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("b", "a", cmp(CmpOp::Gt, "x", 0)),
            Operator::filter("c", "b", cmp(CmpOp::Lt, "y", 5)),
            Operator::distinct("d", "b"),
            Operator::store("c", "out1"),
            Operator::store("d", "out2"),
        ])
        .unwrap();

        let second = plan.find_operator_for_alias("c").unwrap();
        assert!(!FilterMerge.apply(&mut plan, second).unwrap());
    }
}
