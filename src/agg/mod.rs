//! Aggregate functions
//!
//! Aggregate functions are an open set chosen at configuration time and
//! dispatched per row through the `AggFunc` trait. Every function supports
//! decomposed execution: `result_partial` emits an intermediate state value
//! and `consume_partial` merges one, which is what the spill pipeline and
//! distributed partials both rely on.

pub mod functions;

use crate::error::Result;
use crate::expr::Evaluator;
use crate::operators::Batch;
use crate::types::TypeContext;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Per-group mutable aggregation state.
pub trait AggFunc: Send {
    /// Fold one freshly evaluated value into the state.
    fn consume(&mut self, val: &Value);

    /// Merge a partial previously produced by `result_partial`.
    fn consume_partial(&mut self, val: &Value) -> Result<()>;

    /// The final result for this group.
    fn result(&self, ctx: &TypeContext) -> Value;

    /// An intermediate state value mergeable via `consume_partial`.
    fn result_partial(&self, ctx: &TypeContext) -> Value;
}

/// Factory producing fresh aggregation state, one per group row.
pub type AggPattern = Arc<dyn Fn() -> Box<dyn AggFunc> + Send + Sync>;

/// The built-in aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Union,
    Collect,
    Any,
}

impl AggKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "union" => Some(Self::Union),
            "collect" => Some(Self::Collect),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn pattern(self) -> AggPattern {
        use functions::*;
        match self {
            Self::Count => Arc::new(|| Box::new(Count::default()) as Box<dyn AggFunc>),
            Self::Sum => Arc::new(|| Box::new(Sum::default()) as Box<dyn AggFunc>),
            Self::Avg => Arc::new(|| Box::new(Avg::default()) as Box<dyn AggFunc>),
            Self::Min => Arc::new(|| Box::new(Extreme::min()) as Box<dyn AggFunc>),
            Self::Max => Arc::new(|| Box::new(Extreme::max()) as Box<dyn AggFunc>),
            Self::Union => Arc::new(|| Box::new(Distinct::union()) as Box<dyn AggFunc>),
            Self::Collect => Arc::new(|| Box::new(Distinct::collect()) as Box<dyn AggFunc>),
            Self::Any => Arc::new(|| Box::new(Any::default()) as Box<dyn AggFunc>),
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Union => "union",
            Self::Collect => "collect",
            Self::Any => "any",
        };
        write!(f, "{}", name)
    }
}

/// An aggregate call site: the state factory paired with the operand
/// expression (absent for `count()` over whole records).
pub struct AggSpec {
    pattern: AggPattern,
    expr: Option<Arc<dyn Evaluator>>,
}

impl AggSpec {
    pub fn new(kind: AggKind, expr: Option<Arc<dyn Evaluator>>) -> Self {
        Self {
            pattern: kind.pattern(),
            expr,
        }
    }

    /// A custom aggregate plugged in through its own state factory.
    pub fn custom(pattern: AggPattern, expr: Option<Arc<dyn Evaluator>>) -> Self {
        Self { pattern, expr }
    }

    pub fn instantiate(&self) -> Box<dyn AggFunc> {
        (self.pattern)()
    }

    /// Evaluate the operand against `input` and fold it into `func`.
    /// Quiet operand values contribute nothing.
    pub fn apply(&self, batch: &Batch, func: &mut dyn AggFunc, input: &Value) {
        match &self.expr {
            Some(expr) => {
                let v = expr.eval(batch, input);
                if v.is_quiet() {
                    return;
                }
                func.consume(&v);
            }
            None => func.consume(input),
        }
    }
}
