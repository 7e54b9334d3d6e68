//! Rewrite rule trait and strategy combinators.

use dataflow::{DataflowPlan, PlanError};
use petgraph::graph::NodeIndex;

/// A pattern-directed rewrite applied at a single operator.
///
/// Rules are small and pure in spirit: they inspect the node, decide whether
/// the pattern matches, and perform the edit through the plan's structural
/// API. Returning `true` signals the plan changed and the fixed-point driver
/// restarts its traversal.
pub trait RewriteRule {
    fn name(&self) -> &'static str;

    /// Attempt to apply this rule at `node`; returns true if the plan changed.
    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError>;
}

/// Applies each inner rule in order at the same node.
pub struct Sequence {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Sequence {
    pub fn new(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        Self { rules }
    }
}

impl RewriteRule for Sequence {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        let mut changed = false;
        for rule in &self.rules {
            if !plan.contains(node) {
                break;
            }
            changed |= rule.apply(plan, node)?;
        }
        Ok(changed)
    }
}

/// Applies the first inner rule whose pattern matches at the node.
pub struct Choice {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Choice {
    pub fn new(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        Self { rules }
    }
}

impl RewriteRule for Choice {
    fn name(&self) -> &'static str {
        "choice"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        for rule in &self.rules {
            if rule.apply(plan, node)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{OpKind, Operator};

    /// Removes the operator when its tag matches.
    struct RemoveTagged(&'static str);

    impl RewriteRule for RemoveTagged {
        fn name(&self) -> &'static str {
            "remove-tagged"
        }

        fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
            if plan.node(node).tag() != self.0 || !plan.node(node).is_unary() {
                return Ok(false);
            }
            plan.remove(node, false)?;
            Ok(true)
        }
    }

    fn chain() -> DataflowPlan {
        DataflowPlan::new(vec![
            Operator::load("a", "f", None),
            Operator::distinct("b", "a"),
            Operator::limit("c", "b", 10),
            Operator::dump("c"),
        ])
        .unwrap()
    }

    #[test]
    fn choice_stops_at_the_first_match() {
        let mut plan = chain();
        let distinct = plan.find_operator_for_alias("b").unwrap();
        let rule = Choice::new(vec![
            Box::new(RemoveTagged("DISTINCT")),
            Box::new(RemoveTagged("LIMIT")),
        ]);
        assert!(rule.apply(&mut plan, distinct).unwrap());
        // Only the first matching rule fired.
        assert!(plan
            .operators()
            .any(|(_, op)| matches!(op.kind(), OpKind::Limit { .. })));
        assert_eq!(plan.operator_count(), 3);
    }

    #[test]
    fn sequence_applies_rules_in_order() {
        let mut plan = chain();
        let distinct = plan.find_operator_for_alias("b").unwrap();
        let rule = Sequence::new(vec![
            Box::new(RemoveTagged("DISTINCT")),
            // The node is gone after the first edit; the sequence notices
            // and stops instead of touching a stale index.
            Box::new(RemoveTagged("LIMIT")),
        ]);
        assert!(rule.apply(&mut plan, distinct).unwrap());
        assert_eq!(plan.operator_count(), 3);
    }
}
