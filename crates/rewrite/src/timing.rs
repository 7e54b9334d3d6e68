//! Opt-in timing instrumentation for profiled runs.

use dataflow::{DataflowPlan, OpKind, Operator, PlanError};
use petgraph::graph::NodeIndex;

use crate::rule::RewriteRule;

/// Wrap an operator's output pipe with a `TimingOp` that tags every record
/// with the operator's lineage signature and the partition id on emission.
///
/// Sources keep their shim too; sinks and existing shims are skipped, which
/// keeps the rule idempotent.
pub struct TimingInstrumentation;

impl RewriteRule for TimingInstrumentation {
    fn name(&self) -> &'static str {
        "timing-instrumentation"
    }

    fn apply(&self, plan: &mut DataflowPlan, node: NodeIndex) -> Result<bool, PlanError> {
        let op = plan.node(node);
        if op.is_sink() || matches!(op.kind(), OpKind::TimingOp { .. }) {
            return Ok(false);
        }
        // A single output pipe is required for the splice.
        let out = match op.outputs() {
            [single] => single.clone(),
            _ => return Ok(false),
        };
        // Already instrumented?
        let already = plan
            .consumers_of(&out)
            .into_iter()
            .any(|c| matches!(plan.node(c).kind(), OpKind::TimingOp { .. }));
        if already {
            return Ok(false);
        }

        let signature = plan.signature_of(node);
        let shim = Operator::timing("timing", &out, &signature);
        plan.insert_after(node, shim)?;
        Ok(true)
    }
}
