//! Expression evaluation seams
//!
//! The operator consumes expressions through the `Evaluator` trait and
//! never looks inside them. Evaluation errors travel inline as error
//! values, not as `Err` results.

pub mod compare;

pub use compare::{KeysComparator, NullOrdering, SortDirection, SortKey, ValueCompare};

use crate::operators::Batch;
use crate::types::TypeContext;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// A dotted path naming a (possibly nested) record field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parse a dotted path like `a.b.c`.
    pub fn parse(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// Evaluates an expression against one input value. The batch argument is
/// the evaluation context the value was pulled in; evaluators that need
/// shared batch state can reach it there.
pub trait Evaluator: Send + Sync {
    fn eval(&self, batch: &Batch, value: &Value) -> Value;
}

/// Reads a record field by dotted path, producing `missing` when any
/// segment is absent or the value is not a record.
pub struct FieldRef {
    ctx: Arc<TypeContext>,
    path: FieldPath,
}

impl FieldRef {
    pub fn new(ctx: Arc<TypeContext>, path: impl Into<FieldPath>) -> Self {
        Self {
            ctx,
            path: path.into(),
        }
    }
}

impl Evaluator for FieldRef {
    fn eval(&self, _batch: &Batch, value: &Value) -> Value {
        let mut cur = value.clone();
        for seg in self.path.segments() {
            let fields = match cur.typ().fields() {
                Some(f) => f,
                None => return Value::missing(&self.ctx),
            };
            let idx = match fields.iter().position(|f| f.name == *seg) {
                Some(i) => i,
                None => return Value::missing(&self.ctx),
            };
            cur = match cur.field_at(idx) {
                Ok(Some(v)) => v,
                _ => return Value::missing(&self.ctx),
            };
        }
        cur
    }
}

/// A constant expression.
pub struct Literal(Value);

impl Literal {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

impl Evaluator for Literal {
    fn eval(&self, _batch: &Batch, _value: &Value) -> Value {
        self.0.clone()
    }
}

/// Hook for resetting stateful expressions at end of stream, before the
/// operator restarts on the next sub-stream.
pub trait Resetter: Send {
    fn reset(&mut self);
}

/// Resetter for expression sets with no state.
pub struct NoopResetter;

impl Resetter for NoopResetter {
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_ref() {
        let ctx = Arc::new(TypeContext::new());
        let rec = Value::record(
            &ctx,
            vec![
                ("a", Value::int64(&ctx, 3)),
                (
                    "b",
                    Value::record(&ctx, vec![("x", Value::string(&ctx, "deep"))]),
                ),
            ],
        );
        let batch = Batch::empty();
        let a = FieldRef::new(ctx.clone(), "a").eval(&batch, &rec);
        assert_eq!(a.as_int64().unwrap(), 3);
        let bx = FieldRef::new(ctx.clone(), "b.x").eval(&batch, &rec);
        assert_eq!(bx.as_str().unwrap(), "deep");
        let gone = FieldRef::new(ctx.clone(), "nope").eval(&batch, &rec);
        assert!(gone.is_missing());
    }

    #[test]
    fn test_literal() {
        let ctx = Arc::new(TypeContext::new());
        let lit = Literal::new(Value::int64(&ctx, 9));
        let out = lit.eval(&Batch::empty(), &Value::null(ctx.type_null()));
        assert_eq!(out.as_int64().unwrap(), 9);
    }
}
