//! Rule registry and the fixed-point rewrite driver.

use common::BackendKind;
use dataflow::{DataflowPlan, PlanError};
use tracing::debug;

use crate::filter_merge::FilterMerge;
use crate::pushdown::{PushFilterThroughForeach, PushFilterThroughUnion};
use crate::rule::RewriteRule;
use crate::timing::TimingInstrumentation;
use crate::window::WindowRewrite;

/// Upper bound on full fixed-point sweeps; every rule strictly shrinks the
/// plan or replaces a tag with a smaller normal form, so this only guards
/// against a misbehaving user-registered rule.
const MAX_SWEEPS: usize = 64;

/// An ordered collection of rewrite rules.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend-independent rule set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FilterMerge));
        registry.register(Box::new(PushFilterThroughForeach));
        registry.register(Box::new(PushFilterThroughUnion));
        registry
    }

    pub fn register(&mut self, rule: Box<dyn RewriteRule>) {
        self.rules.push(rule);
    }

    /// Add the rules a backend contributes on registration.
    pub fn register_backend_rules(&mut self, backend: BackendKind) {
        if backend.is_streaming() {
            self.register(Box::new(WindowRewrite));
        }
    }

    /// Add the opt-in profiling instrumentation rule.
    pub fn register_profiling_rules(&mut self) {
        self.register(Box::new(TimingInstrumentation));
    }

    pub fn rules(&self) -> &[Box<dyn RewriteRule>] {
        &self.rules
    }
}

/// Run the registry to a fixed point.
///
/// Each sweep offers every rule at every operator in dependency order; a
/// successful match restarts the traversal since node indices may be stale
/// after a structural edit.
pub fn rewrite_plan(plan: &mut DataflowPlan, registry: &RuleRegistry) -> Result<(), PlanError> {
    for _sweep in 0..MAX_SWEEPS {
        let mut changed = false;
        'rules: for rule in registry.rules() {
            for node in plan.topo_order()? {
                if !plan.contains(node) {
                    continue;
                }
                if rule.apply(plan, node)? {
                    debug!("rule {} fired", rule.name());
                    changed = true;
                    break 'rules;
                }
            }
        }
        if !changed {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{
        CmpOp, Expr, Field, FieldType, Literal, OpKind, Operator, Predicate, Ref, Schema,
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

    fn two_filters() -> DataflowPlan {
        DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("b", "a", cmp(CmpOp::Gt, "x", 0)),
            Operator::filter("c", "b", cmp(CmpOp::Lt, "y", 5)),
            Operator::store("c", "out"),
        ])
        .unwrap()
    }

    #[test]
    fn fixed_point_merges_filter_chain() {
        let mut plan = two_filters();
        rewrite_plan(&mut plan, &RuleRegistry::with_defaults()).unwrap();

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
    fn rewrite_is_idempotent() {
        let mut once = two_filters();
        let registry = RuleRegistry::with_defaults();
        rewrite_plan(&mut once, &registry).unwrap();
        let count_once = once.operator_count();

        rewrite_plan(&mut once, &registry).unwrap();
        assert_eq!(once.operator_count(), count_once);
    }

    #[test]
    fn three_filters_collapse_to_one() {
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("b", "a", cmp(CmpOp::Gt, "x", 0)),
            Operator::filter("c", "b", cmp(CmpOp::Lt, "y", 5)),
            Operator::filter("d", "c", cmp(CmpOp::Neq, "x", 3)),
            Operator::store("d", "out"),
        ])
        .unwrap();
        rewrite_plan(&mut plan, &RuleRegistry::with_defaults()).unwrap();
        let filters = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Filter { .. }))
            .count();
        assert_eq!(filters, 1);
    }
}
