//! Markov model over lineage signatures.
//!
//! A directed multigraph recording, across compilations, how often each
//! operator was executed and what it cost. Node and edge keys are lineage
//! signatures plus the synthetic `start`/`end` endpoints; the model persists
//! as a single JSON document between runs and drives the materialization
//! planner's probability and cost estimates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use common::{CostStrategy, ProbStrategy};

use crate::error::ProfilingError;
use crate::stats::CostStat;

/// Synthetic entry node; its visit count equals `total_runs`.
pub const START_NODE: &str = "start";
/// Synthetic exit node.
pub const END_NODE: &str = "end";
/// Fixed runtime overhead node preceding `start`.
pub const CONTEXT_NODE: &str = "sparkcontext";

/// Per-operator statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MarkovNode {
    visits: u64,
    cost: CostStat,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    input_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    output_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    records: Option<u64>,
}

impl MarkovNode {
    pub fn visits(&self) -> u64 {
        self.visits
    }

    pub fn cost(&self) -> &CostStat {
        &self.cost
    }
}

/// The operator-transition graph with per-node cost and size statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MarkovModel {
    total_runs: u64,
    nodes: BTreeMap<String, MarkovNode>,
    /// `edges[u][v]` counts observed transitions from `u` to `v`.
    edges: BTreeMap<String, BTreeMap<String, u64>>,
}

impl MarkovModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_runs(&self) -> u64 {
        self.total_runs
    }

    /// Record the start of a compilation run.
    pub fn start_run(&mut self) {
        self.total_runs += 1;
        self.nodes.entry(START_NODE.to_string()).or_default().visits += 1;
    }

    /// Record a transition, incrementing the edge count and the destination
    /// node's visit count.
    pub fn add(&mut self, from: &str, to: &str) {
        *self
            .edges
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_insert(0) += 1;
        self.nodes.entry(to.to_string()).or_default().visits += 1;
        self.nodes.entry(from.to_string()).or_default();
    }

    /// Record the fixed runtime overhead edge `sparkcontext -> start`.
    ///
    /// Only the edge count is bumped: `start`'s visit count must keep
    /// tracking `total_runs`, which `start_run` maintains.
    pub fn bootstrap(&mut self) {
        *self
            .edges
            .entry(CONTEXT_NODE.to_string())
            .or_default()
            .entry(START_NODE.to_string())
            .or_insert(0) += 1;
        self.nodes.entry(CONTEXT_NODE.to_string()).or_default();
        self.nodes.entry(START_NODE.to_string()).or_default();
    }

    /// Fold an observed duration into the node's cost summary.
    pub fn update_cost(&mut self, node: &str, millis: u64) {
        self.nodes
            .entry(node.to_string())
            .or_default()
            .cost
            .record(millis);
    }

    /// Record the observed output size of a node in bytes.
    pub fn update_size(&mut self, node: &str, bytes: u64) {
        self.nodes.entry(node.to_string()).or_default().output_bytes = Some(bytes);
    }

    /// Record the observed input size of a node in bytes.
    pub fn update_input_size(&mut self, node: &str, bytes: u64) {
        self.nodes.entry(node.to_string()).or_default().input_size = Some(bytes);
    }

    /// Record the observed output record count of a node.
    pub fn update_records(&mut self, node: &str, records: u64) {
        self.nodes.entry(node.to_string()).or_default().records = Some(records);
    }

    pub fn node(&self, key: &str) -> Option<&MarkovNode> {
        self.nodes.get(key)
    }

    /// Immediate predecessors of a node.
    pub fn parents(&self, node: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains_key(node))
            .map(|(from, _)| from.as_str())
            .collect()
    }

    pub fn input_size(&self, node: &str) -> Option<u64> {
        self.nodes.get(node).and_then(|n| n.input_size)
    }

    pub fn result_records(&self, node: &str) -> Option<u64> {
        self.nodes.get(node).and_then(|n| n.records)
    }

    /// Average output bytes per record, when both sizes were observed.
    pub fn bytes_per_record(&self, node: &str) -> Option<u64> {
        let n = self.nodes.get(node)?;
        match (n.output_bytes, n.records) {
            (Some(bytes), Some(records)) if records > 0 => Some(bytes / records),
            _ => None,
        }
    }

    /// Total observed output bytes of a node.
    pub fn output_bytes(&self, node: &str) -> Option<u64> {
        self.nodes.get(node).and_then(|n| n.output_bytes)
    }

    /// Expected cost and reachability probability of `node` from `start`.
    ///
    /// Enumerates all simple `start ⇝ node` paths. A path's probability is
    /// the product of its edges' relative transition frequencies, its cost
    /// the sum of the average node costs along it. Parallel paths fold by
    /// the given strategies. Returns `None` when the node was never reached.
    pub fn total_cost(
        &self,
        node: &str,
        prob_strategy: ProbStrategy,
        cost_strategy: CostStrategy,
    ) -> Option<(f64, f64)> {
        let mut paths = Vec::new();
        let mut visited = BTreeSet::from([START_NODE.to_string()]);
        self.enumerate_paths(
            START_NODE,
            node,
            1.0,
            self.node_avg_cost(START_NODE),
            &mut visited,
            &mut paths,
        );
        if paths.is_empty() {
            return None;
        }

        let cost = paths
            .iter()
            .map(|(cost, _)| *cost)
            .fold(None::<f64>, |acc, c| {
                Some(match (acc, cost_strategy) {
                    (None, _) => c,
                    (Some(a), CostStrategy::Min) => a.min(c),
                    (Some(a), CostStrategy::Max) => a.max(c),
                })
            })?;

        let probs: Vec<f64> = paths.iter().map(|(_, p)| *p).collect();
        let prob = match prob_strategy {
            ProbStrategy::Min => probs.iter().cloned().fold(f64::INFINITY, f64::min),
            ProbStrategy::Max => probs.iter().cloned().fold(0.0, f64::max),
            ProbStrategy::Avg => probs.iter().sum::<f64>() / probs.len() as f64,
            ProbStrategy::Product => probs.iter().product(),
        };
        Some((cost, prob))
    }

    fn enumerate_paths(
        &self,
        current: &str,
        target: &str,
        prob: f64,
        cost: f64,
        visited: &mut BTreeSet<String>,
        paths: &mut Vec<(f64, f64)>,
    ) {
        if current == target {
            paths.push((cost, prob));
            return;
        }
        let Some(targets) = self.edges.get(current) else {
            return;
        };
        let fanout: u64 = targets.values().sum();
        if fanout == 0 {
            return;
        }
        for (next, count) in targets {
            if visited.contains(next) {
                continue;
            }
            visited.insert(next.clone());
            self.enumerate_paths(
                next,
                target,
                prob * (*count as f64 / fanout as f64),
                cost + self.node_avg_cost(next),
                visited,
                paths,
            );
            visited.remove(next);
        }
    }

    fn node_avg_cost(&self, node: &str) -> f64 {
        self.nodes.get(node).map(|n| n.cost.avg()).unwrap_or(0.0)
    }

    // === Persistence ===

    /// Load the model from disk; an absent file yields an empty model.
    pub fn load(path: &Path) -> Result<Self, ProfilingError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist as pretty JSON, atomically (write to a temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), ProfilingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// start -> a -> b -> sink, every edge observed once.
    fn chain() -> MarkovModel {
        let mut m = MarkovModel::new();
        m.start_run();
        m.add(START_NODE, "a");
        m.add("a", "b");
        m.add("b", "sink");
        m.update_cost("a", 10);
        m.update_cost("b", 20);
        m.update_cost("sink", 5);
        m
    }

    #[test]
    fn single_path_cost_and_prob() {
        let m = chain();
        let (cost, prob) = m
            .total_cost("sink", ProbStrategy::Max, CostStrategy::Max)
            .unwrap();
        assert_eq!(cost, 35.0);
        assert_eq!(prob, 1.0);
    }

    #[test]
    fn unknown_node_has_no_cost() {
        let m = chain();
        assert!(m
            .total_cost("nowhere", ProbStrategy::Max, CostStrategy::Max)
            .is_none());
    }

    #[test]
    fn branching_probabilities() {
        let mut m = MarkovModel::new();
        // start fans out 3:1 between a and b; both reach sink.
        for _ in 0..3 {
            m.start_run();
            m.add(START_NODE, "a");
        }
        m.start_run();
        m.add(START_NODE, "b");
        m.add("a", "sink");
        m.add("b", "sink");
        m.update_cost("a", 100);
        m.update_cost("b", 200);

        let (_, prob_max) = m
            .total_cost("sink", ProbStrategy::Max, CostStrategy::Max)
            .unwrap();
        assert_eq!(prob_max, 0.75);
        let (_, prob_min) = m
            .total_cost("sink", ProbStrategy::Min, CostStrategy::Max)
            .unwrap();
        assert_eq!(prob_min, 0.25);

        let (cost_min, _) = m
            .total_cost("sink", ProbStrategy::Max, CostStrategy::Min)
            .unwrap();
        assert_eq!(cost_min, 100.0);
        let (cost_max, _) = m
            .total_cost("sink", ProbStrategy::Max, CostStrategy::Max)
            .unwrap();
        assert_eq!(cost_max, 200.0);
    }

    #[test]
    fn start_visits_track_total_runs() {
        let mut m = MarkovModel::new();
        m.start_run();
        m.start_run();
        assert_eq!(m.total_runs(), 2);
        assert_eq!(m.node(START_NODE).unwrap().visits(), 2);
    }

    #[test]
    fn parents_and_sizes() {
        let mut m = chain();
        m.update_records("b", 100);
        m.update_size("b", 4200);
        assert_eq!(m.parents("b"), vec!["a"]);
        assert_eq!(m.bytes_per_record("b"), Some(42));
        assert_eq!(m.output_bytes("b"), Some(4200));
        assert_eq!(m.result_records("b"), Some(100));
    }

    #[test]
    fn save_load_roundtrip_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiling.json");
        let m = chain();
        m.save(&path).unwrap();
        let loaded = MarkovModel::load(&path).unwrap();
        assert_eq!(m, loaded);

        // Byte-identical on re-save.
        let first = std::fs::read_to_string(&path).unwrap();
        loaded.save(&path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_missing_file_yields_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        let m = MarkovModel::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(m.total_runs(), 0);
    }
}
