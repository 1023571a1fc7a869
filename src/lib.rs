//! Streaming group-by aggregation engine
//!
//! `tally` groups a pull-based stream of self-describing records by one or
//! more key expressions and maintains a set of aggregate functions per
//! group. Oversized group tables spill sorted runs of partial aggregates
//! to disk and merge them on demand; sorted input enables early emission
//! of completed groups; partials in/out support distributed reduction.

pub mod agg;
pub mod error;
pub mod execution;
pub mod expr;
pub mod operators;
pub mod types;
pub mod value;

// Re-export main types
pub use error::{EngineError, Result};
pub use execution::{ExecutionConfig, RuntimeContext, DEFAULT_GROUP_LIMIT};
pub use operators::{AggregateOp, AggregateOpBuilder, Batch, MemorySource, Puller};
pub use types::TypeContext;
pub use value::Value;
