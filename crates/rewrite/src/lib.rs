//! Pattern-directed plan rewriting for the Hamlet compiler.
//!
//! Small rewrite rules composed through strategy combinators, held in a
//! registry and driven to a fixed point. Backends contribute additional
//! rules on registration (the streaming backend maps relational operators
//! behind a WINDOW onto windowed variants).

mod filter_merge;
mod pushdown;
mod registry;
mod rule;
mod timing;
mod window;

pub use filter_merge::FilterMerge;
pub use pushdown::{PushFilterThroughForeach, PushFilterThroughUnion};
pub use registry::{rewrite_plan, RuleRegistry};
pub use rule::{Choice, RewriteRule, Sequence};
pub use timing::TimingInstrumentation;
pub use window::WindowRewrite;
