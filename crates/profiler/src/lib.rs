//! Profiling support for the Hamlet compiler: the Markov cost model
//! persisted between runs and the HTTP collector that feeds it.

mod collector;
mod error;
mod markov;
mod message;
mod stats;

pub use collector::{Collector, ProfileStore, RunningCollector};
pub use error::ProfilingError;
pub use markov::{MarkovModel, MarkovNode, CONTEXT_NODE, END_NODE, START_NODE};
pub use message::{parse_sizes, parse_times, CollectorMessage, ParentRef, TimeMsg};
pub use stats::CostStat;
