//! Named edges between operators.

use petgraph::graph::NodeIndex;
use std::fmt;

/// A named directed edge carrying tuples from one operator's output to the
/// inputs of its consumers. Every pipe has exactly one producer; the name
/// uniquely identifies the pipe within one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipe {
    name: String,
    producer: NodeIndex,
    consumers: Vec<NodeIndex>,
}

impl Pipe {
    pub fn new(name: &str, producer: NodeIndex) -> Self {
        Self {
            name: name.to_string(),
            producer,
            consumers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn producer(&self) -> NodeIndex {
        self.producer
    }

    pub fn consumers(&self) -> &[NodeIndex] {
        &self.consumers
    }

    pub(crate) fn add_consumer(&mut self, consumer: NodeIndex) {
        if !self.consumers.contains(&consumer) {
            self.consumers.push(consumer);
        }
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} -> {} consumer(s)]",
            self.name,
            self.producer.index(),
            self.consumers.len()
        )
    }
}
