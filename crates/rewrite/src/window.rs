//! Map relational operators behind a WINDOW onto stream-windowed variants.
//!
//! Only registered for streaming backends: batch backends execute the
//! window as a plain bounded operator.

use dataflow::{DataflowPlan, OpKind, PlanError};
use petgraph::graph::NodeIndex;

use crate::rule::RewriteRule;

/// `WINDOW(range, slide)` followed by an eligible operator fuses into a
/// single `Windowed` operator carrying the window spec.
pub struct WindowRewrite;

fn eligible(kind: &OpKind) -> bool {
    matches!(
        kind,
        OpKind::Distinct
            | OpKind::Grouping { .. }
            | OpKind::Foreach { .. }
            | OpKind::Join { .. }
            | OpKind::OrderBy { .. }
    )
}

impl RewriteRule for WindowRewrite {
    fn name(&self) -> &'static str {
        "window-rewrite"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        if !eligible(plan.node(node).kind()) {
            return Ok(false);
        }
        let input = match plan.node(node).inputs() {
            [single] => single.clone(),
            _ => return Ok(false),
        };
        let producer = match plan.find_operator_for_alias(&input) {
            Some(p) => p,
            None => return Ok(false),
        };
        let spec = match plan.node(producer).kind() {
            OpKind::Window { spec } => spec.clone(),
            _ => return Ok(false),
        };
        // The window's extent applies to this consumer alone.
        if plan.consumers_of(&input).len() != 1 {
            return Ok(false);
        }

        let inner = plan.node(node).kind().clone();
        *plan.node_mut(node).kind_mut() = OpKind::Windowed {
            spec,
            inner: Box::new(inner),
        };
        plan.remove(producer, false)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{Field, FieldType, Operator, Ref, Schema, WindowSpec, WindowUnit};

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Int),
        ])
    }

    #[test]
    fn fuses_window_into_grouping() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::window(
                "w",
                "a",
                WindowSpec {
                    size: 10,
                    unit: WindowUnit::Seconds,
                    slide: Some((5, WindowUnit::Seconds)),
                },
            ),
            Operator::grouping("g", "w", vec![Ref::named("x")]),
            Operator::store("g", "out"),
        ])
        .unwrap();

        let grouping = plan.find_operator_for_alias("g").unwrap();
        assert!(WindowRewrite.apply(&mut plan, grouping).unwrap());
        assert_eq!(plan.operator_count(), 3);

        let OpKind::Windowed { spec, inner } = plan.node(grouping).kind() else {
            panic!("expected a windowed operator");
        };
        assert_eq!(spec.size, 10);
        assert!(matches!(inner.as_ref(), OpKind::Grouping { .. }));
        // Schema is the grouping's schema, computed through the window.
        assert_eq!(plan.node(grouping).schema().unwrap().arity(), 2);
    }

    #[test]
    fn ignores_operators_without_window_input() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::distinct("d", "a"),
            Operator::store("d", "out"),
        ])
        .unwrap();
        let distinct = plan.find_operator_for_alias("d").unwrap();
        assert!(!WindowRewrite.apply(&mut plan, distinct).unwrap());
    }
}
