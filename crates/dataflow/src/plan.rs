//! The dataflow plan: an operator graph with schema propagation and the
//! structural edit primitives the rewrite engine is built on.

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use md5::{Digest, Md5};

use crate::error::PlanError;
use crate::error::SchemaError;
use crate::op::{Generator, OpKind, Operator};
use crate::pipe::Pipe;
use crate::schema::Schema;

/// Nested FOREACH plans may recurse this deep.
const MAX_NESTING: usize = 2;

/// A typed operator graph. Nodes live in an arena owned by the plan and are
/// addressed by `NodeIndex`; pipe name lists on the operators are the wiring
/// authority (input order is positional for JOIN), edges mirror them for
/// traversal.
#[derive(Debug, Clone, Default)]
pub struct DataflowPlan {
    graph: StableDiGraph<Operator, String>,
    /// Jars collected from `REGISTER` statements.
    additional_jars: Vec<String>,
    /// Pipes fed by an enclosing plan (nested FOREACH only).
    external: HashMap<String, Option<Schema>>,
    fresh_counter: usize,
}

impl DataflowPlan {
    /// Assemble a plan from the parser's flat operator list.
    pub fn new(ops: Vec<Operator>) -> Result<Self, PlanError> {
        Self::assemble(ops, HashMap::new(), 0)
    }

    fn assemble(
        ops: Vec<Operator>,
        external: HashMap<String, Option<Schema>>,
        depth: usize,
    ) -> Result<Self, PlanError> {
        if depth > MAX_NESTING {
            return Err(PlanError::NestingTooDeep);
        }
        let mut plan = DataflowPlan {
            external,
            ..Default::default()
        };
        for mut op in ops {
            // Deserialized operators may still carry the parser's empty
            // initial out pipe name, which denotes a sink.
            let outputs: Vec<String> = op
                .outputs()
                .iter()
                .filter(|o| !o.is_empty())
                .cloned()
                .collect();
            op.set_outputs(outputs);
            if let OpKind::Register { jar } = op.kind() {
                plan.additional_jars.push(jar.clone());
            } else {
                plan.graph.add_node(op);
            }
        }
        plan.rewire()?;
        plan.propagate_schemas(depth)?;
        Ok(plan)
    }

    // === Wiring ===

    /// Rebuild the edge set from the operators' pipe name lists.
    ///
    /// Called after every structural edit; fails on duplicate output pipes
    /// and on input pipes with no producer.
    fn rewire(&mut self) -> Result<(), PlanError> {
        let ids: Vec<_> = self.graph.node_indices().collect();
        let mut producers: HashMap<String, NodeIndex> = HashMap::new();
        for &idx in &ids {
            for out in self.graph[idx].outputs() {
                if producers.insert(out.clone(), idx).is_some() {
                    return Err(PlanError::DuplicatePipe(out.clone()));
                }
            }
        }
        let edges: Vec<_> = self.graph.edge_indices().collect();
        for e in edges {
            self.graph.remove_edge(e);
        }
        for &idx in &ids {
            let inputs = self.graph[idx].inputs().to_vec();
            for name in inputs {
                match producers.get(&name) {
                    Some(&p) => {
                        self.graph.add_edge(p, idx, name);
                    }
                    None if self.external.contains_key(&name) => {}
                    None => return Err(PlanError::InvalidPipe(name)),
                }
            }
        }
        Ok(())
    }

    /// Prepare nested sub-plans and run `construct_schema` in dependency
    /// order. Idempotent; re-run after structural edits.
    fn propagate_schemas(&mut self, depth: usize) -> Result<(), PlanError> {
        for idx in self.topo_order()? {
            let input_schemas = self.input_schemas_of(idx);
            let in_pipe = self.graph[idx].inputs().first().cloned();
            let out_pipe = self.graph[idx].out_pipe().unwrap_or_default().to_string();

            if let OpKind::Foreach {
                gen: Generator::Plan(sub_ops),
                subplan,
            } = self.graph[idx].kind_mut()
            {
                let parent_schema = input_schemas.first().cloned().flatten();
                let mut sub_ops = sub_ops.clone();
                for sop in &mut sub_ops {
                    if let OpKind::ConstructBag { parent_schema: ps, .. } = sop.kind_mut() {
                        *ps = parent_schema.clone();
                    }
                }
                let mut ext = HashMap::new();
                if let Some(pipe) = in_pipe {
                    ext.insert(pipe, parent_schema);
                }
                let sub = DataflowPlan::assemble(sub_ops, ext, depth + 1)?;
                let terminals = sub.terminal_nodes();
                let &last = match terminals.as_slice() {
                    [single] => single,
                    _ => return Err(PlanError::DanglingSubPlan(out_pipe)),
                };
                if !matches!(sub.graph[last].kind(), OpKind::Generate { .. }) {
                    return Err(PlanError::MissingGenerate);
                }
                *subplan = Some(Box::new(sub));
            }

            self.graph[idx].construct_schema(&input_schemas)?;
        }
        Ok(())
    }

    /// Re-run nested-plan preparation and schema propagation.
    pub fn refresh_schemas(&mut self) -> Result<(), PlanError> {
        self.propagate_schemas(0)
    }

    fn input_schemas_of(&self, idx: NodeIndex) -> Vec<Option<Schema>> {
        self.graph[idx]
            .inputs()
            .iter()
            .map(|name| match self.find_operator_for_alias(name) {
                Some(p) => self.graph[p].schema().cloned(),
                None => self.external.get(name).cloned().flatten(),
            })
            .collect()
    }

    // === Queries ===

    pub fn node(&self, idx: NodeIndex) -> &Operator {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Operator {
        &mut self.graph[idx]
    }

    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.graph.contains_node(idx)
    }

    pub fn operator_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn operators(&self) -> impl Iterator<Item = (NodeIndex, &Operator)> {
        self.graph
            .node_indices()
            .map(move |idx| (idx, &self.graph[idx]))
    }

    pub fn additional_jars(&self) -> &[String] {
        &self.additional_jars
    }

    /// Operators with no consumers at all (sinks and dangling outputs).
    fn terminal_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Operators with no output pipes (`STORE`, `DUMP`).
    pub fn sink_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].is_sink())
            .collect()
    }

    /// Operators with no input pipes.
    pub fn source_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].is_source())
            .collect()
    }

    /// The operator producing the pipe with the given alias.
    pub fn find_operator_for_alias(&self, alias: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&idx| self.graph[idx].outputs().iter().any(|o| o == alias))
    }

    /// The operator whose lineage signature equals `signature`.
    pub fn get(&self, signature: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&idx| self.signature_of(idx) == signature)
    }

    /// Consumers of the named pipe, in arbitrary order.
    pub fn consumers_of(&self, pipe: &str) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].inputs().iter().any(|i| i == pipe))
            .collect()
    }

    /// The pipe table: name to producer/consumers, sorted by name.
    pub fn pipes(&self) -> BTreeMap<String, Pipe> {
        let mut table = BTreeMap::new();
        for idx in self.graph.node_indices() {
            for out in self.graph[idx].outputs() {
                table.insert(out.clone(), Pipe::new(out, idx));
            }
        }
        for idx in self.graph.node_indices() {
            for input in self.graph[idx].inputs() {
                if let Some(pipe) = table.get_mut(input) {
                    pipe.add_consumer(idx);
                }
            }
        }
        table
    }

    /// Schema of the single terminal operator (nested plans).
    pub fn sink_schema(&self) -> Option<Schema> {
        match self.terminal_nodes().as_slice() {
            [single] => self.graph[*single].schema().cloned(),
            _ => None,
        }
    }

    /// Node indices in dependency order.
    pub fn topo_order(&self) -> Result<Vec<NodeIndex>, PlanError> {
        toposort(&self.graph, None).map_err(|_| PlanError::Cyclic)
    }

    // === Lineage ===

    /// The canonical recursive lineage string of an operator.
    pub fn lineage_of(&self, idx: NodeIndex) -> String {
        let mut memo = HashMap::new();
        self.lineage_memo(idx, &mut memo)
    }

    fn lineage_memo(&self, idx: NodeIndex, memo: &mut HashMap<NodeIndex, String>) -> String {
        if let Some(hit) = memo.get(&idx) {
            return hit.clone();
        }
        let input_lineages: Vec<String> = self.graph[idx]
            .inputs()
            .iter()
            .filter_map(|name| self.find_operator_for_alias(name))
            .map(|p| self.lineage_memo(p, memo))
            .collect();
        // Inserted shims are transparent: instrumenting or caching a plan
        // must not change the signatures seen downstream.
        let lineage = match self.graph[idx].kind() {
            OpKind::TimingOp { .. } | OpKind::Cache { .. } => {
                input_lineages.into_iter().next().unwrap_or_default()
            }
            _ => self.graph[idx].lineage_string(&input_lineages),
        };
        memo.insert(idx, lineage.clone());
        lineage
    }

    /// MD5 hex digest of the lineage string; the identity used by the Markov
    /// model and the materialization cache.
    pub fn signature_of(&self, idx: NodeIndex) -> String {
        format!("{:x}", Md5::digest(self.lineage_of(idx).as_bytes()))
    }

    // === Consistency ===

    /// Verify the plan is weakly connected.
    pub fn check_consistency(&self) -> Result<(), PlanError> {
        let mut ids = self.graph.node_indices();
        let start = match ids.next() {
            Some(idx) => idx,
            None => return Ok(()),
        };
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_undirected(idx) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        if seen.len() == self.graph.node_count() {
            Ok(())
        } else {
            Err(PlanError::Disconnected)
        }
    }

    /// Run every operator's conformance rule, collecting all failures.
    pub fn check_schema_conformance(&self) -> Result<(), SchemaError> {
        let mut offending = Vec::new();
        for idx in self.graph.node_indices() {
            let input_schemas = self.input_schemas_of(idx);
            if self.graph[idx].check_conformance(&input_schemas).is_err() {
                offending.push(self.graph[idx].to_string());
            }
        }
        if offending.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Conformance(offending))
        }
    }

    // === Structural edits ===

    fn fresh_pipe(&mut self, base: &str) -> String {
        loop {
            self.fresh_counter += 1;
            let name = format!("{}_{}", base, self.fresh_counter);
            if self.find_operator_for_alias(&name).is_none() {
                return name;
            }
        }
    }

    /// Splice `new_op` onto `old`'s single output pipe.
    ///
    /// Non-sink insertions reroute `old`'s consumers to read from `new_op`
    /// (preserving each consumer's input order); a sink (`STORE`) becomes an
    /// additional consumer instead.
    pub fn insert_after(&mut self, old: NodeIndex, mut new_op: Operator) -> Result<NodeIndex, PlanError> {
        let outputs = self.graph[old].outputs();
        let old_out = match outputs {
            [single] => single.clone(),
            _ => return Err(PlanError::NotUnary(self.graph[old].tag().to_string())),
        };
        if new_op.is_sink() {
            new_op.set_inputs(vec![old_out]);
            let idx = self.graph.add_node(new_op);
            self.rewire()?;
            self.refresh_schemas()?;
            return Ok(idx);
        }
        let fresh = self.fresh_pipe(&old_out);
        new_op.set_inputs(vec![old_out.clone()]);
        new_op.set_outputs(vec![fresh.clone()]);
        let consumers = self.consumers_of(&old_out);
        for c in consumers {
            self.graph[c].replace_input(&old_out, &fresh);
        }
        let idx = self.graph.add_node(new_op);
        self.rewire()?;
        self.refresh_schemas()?;
        Ok(idx)
    }

    /// Place `new_op` on the specific edge from `producer` to `consumer`.
    pub fn insert_between(
        &mut self,
        producer: NodeIndex,
        consumer: NodeIndex,
        mut new_op: Operator,
    ) -> Result<NodeIndex, PlanError> {
        let shared = self.graph[consumer]
            .inputs()
            .iter()
            .find(|name| self.find_operator_for_alias(name) == Some(producer))
            .cloned()
            .ok_or(PlanError::NotAdjacent)?;
        let fresh = self.fresh_pipe(&shared);
        new_op.set_inputs(vec![shared.clone()]);
        new_op.set_outputs(vec![fresh.clone()]);
        self.graph[consumer].replace_input(&shared, &fresh);
        let idx = self.graph.add_node(new_op);
        self.rewire()?;
        self.refresh_schemas()?;
        Ok(idx)
    }

    /// Place a copy of `new_op` on every outgoing edge of `producer`.
    pub fn insert_between_all(
        &mut self,
        producer: NodeIndex,
        new_op: &Operator,
    ) -> Result<Vec<NodeIndex>, PlanError> {
        let consumers: Vec<NodeIndex> = self.graph[producer]
            .outputs()
            .to_vec()
            .iter()
            .flat_map(|out| self.consumers_of(out))
            .collect();
        let mut inserted = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            inserted.push(self.insert_between(producer, consumer, new_op.clone())?);
        }
        Ok(inserted)
    }

    /// Delete `idx`, connecting its input producer directly to its consumers.
    ///
    /// With `remove_predecessors`, also deletes the transitive upstream cone
    /// that fed only the removed operator.
    pub fn remove(&mut self, idx: NodeIndex, remove_predecessors: bool) -> Result<(), PlanError> {
        if !self.graph.contains_node(idx) {
            return Err(PlanError::UnknownOperator(format!("#{}", idx.index())));
        }
        if remove_predecessors {
            let outs = self.graph[idx].outputs().to_vec();
            for out in &outs {
                for c in self.consumers_of(out) {
                    let kept: Vec<String> = self.graph[c]
                        .inputs()
                        .iter()
                        .filter(|i| *i != out)
                        .cloned()
                        .collect();
                    self.graph[c].set_inputs(kept);
                }
            }
            self.graph.remove_node(idx);
            self.prune_dead_upstream();
        } else {
            let op = &self.graph[idx];
            let in_pipe = match op.inputs() {
                [single] => single.clone(),
                _ => return Err(PlanError::NotUnary(op.tag().to_string())),
            };
            let outs = op.outputs().to_vec();
            for out in &outs {
                for c in self.consumers_of(out) {
                    self.graph[c].replace_input(out, &in_pipe);
                }
            }
            self.graph.remove_node(idx);
        }
        self.rewire()?;
        self.refresh_schemas()
    }

    /// Drop non-sink operators left without any consumer, repeatedly.
    pub(crate) fn prune_dead_upstream(&mut self) {
        loop {
            let dead: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|&idx| {
                    !self.graph[idx].is_sink()
                        && self.graph[idx]
                            .outputs()
                            .iter()
                            .all(|out| self.consumers_of(out).is_empty())
                })
                .collect();
            if dead.is_empty() {
                return;
            }
            for idx in dead {
                self.graph.remove_node(idx);
            }
        }
    }

    /// Substitute `new_op` for `old` in place, preserving edges.
    pub fn replace(&mut self, old: NodeIndex, mut new_op: Operator) -> Result<NodeIndex, PlanError> {
        new_op.set_inputs(self.graph[old].inputs().to_vec());
        new_op.set_outputs(self.graph[old].outputs().to_vec());
        let idx = self.graph.add_node(new_op);
        self.graph.remove_node(old);
        self.rewire()?;
        self.refresh_schemas()?;
        Ok(idx)
    }

    /// Substitute a source operator for `old`, detaching and pruning the
    /// upstream cone that fed it. Consumer input order is untouched.
    pub fn replace_with_source(
        &mut self,
        old: NodeIndex,
        mut new_op: Operator,
    ) -> Result<NodeIndex, PlanError> {
        new_op.set_inputs(Vec::new());
        new_op.set_outputs(self.graph[old].outputs().to_vec());
        let idx = self.graph.add_node(new_op);
        self.graph.remove_node(old);
        self.prune_dead_upstream();
        self.rewire()?;
        self.refresh_schemas()?;
        Ok(idx)
    }

    /// Exchange two adjacent unary operators.
    pub fn swap(&mut self, a: NodeIndex, b: NodeIndex) -> Result<(), PlanError> {
        if !self.graph[a].is_unary() {
            return Err(PlanError::NotUnary(self.graph[a].tag().to_string()));
        }
        if !self.graph[b].is_unary() {
            return Err(PlanError::NotUnary(self.graph[b].tag().to_string()));
        }
        // Normalize to upstream -> downstream.
        let (up, down) = if self.graph[b].inputs()[0] == self.graph[a].outputs()[0] {
            (a, b)
        } else if self.graph[a].inputs()[0] == self.graph[b].outputs()[0] {
            (b, a)
        } else {
            return Err(PlanError::NotAdjacent);
        };
        let up_in = self.graph[up].inputs()[0].clone();
        let up_out = self.graph[up].outputs()[0].clone();
        let down_out = self.graph[down].outputs()[0].clone();

        self.graph[down].set_inputs(vec![up_in]);
        self.graph[down].set_outputs(vec![up_out.clone()]);
        self.graph[up].set_inputs(vec![up_out]);
        self.graph[up].set_outputs(vec![down_out]);

        self.rewire()?;
        self.refresh_schemas()
    }
}

impl fmt::Display for DataflowPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = self.topo_order().unwrap_or_else(|_| {
            self.graph.node_indices().collect()
        });
        for idx in order {
            writeln!(f, "{}", self.graph[idx])?;
        }
        Ok(())
    }
}
