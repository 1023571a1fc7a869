//! Value and key comparators
//!
//! Comparison is total across types: values compare within their type
//! class (numbers cross-compare between int64 and float64), and distinct
//! classes order by a fixed class rank. Null placement is configurable;
//! missing values compare as null so partially absent keys still sort
//! deterministically.

use super::Evaluator;
use crate::operators::Batch;
use crate::types::Kind;
use crate::value::{flat, Value};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    NullsFirst,
    NullsLast,
}

fn class_rank(kind: &Kind) -> u8 {
    match kind {
        Kind::Null => 0,
        Kind::Int64 | Kind::Float64 => 1,
        Kind::String => 2,
        Kind::Bytes => 3,
        Kind::Bool => 4,
        Kind::Record(_) => 5,
        Kind::List(_) => 6,
        Kind::Error(_) => 7,
    }
}

fn as_number(v: &Value) -> Option<Num> {
    match (v.typ().kind(), v.bytes()) {
        (Kind::Int64, Some(b)) => flat::decode_int64(b).ok().map(Num::Int),
        (Kind::Float64, Some(b)) if b.len() == 8 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(b);
            Some(Num::Float(f64::from_le_bytes(arr)))
        }
        _ => None,
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn compare_numbers(a: Num, b: Num) -> Ordering {
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => a.cmp(&b),
        (Num::Int(a), Num::Float(b)) => cmp_f64(a as f64, b),
        (Num::Float(a), Num::Int(b)) => cmp_f64(a, b as f64),
        (Num::Float(a), Num::Float(b)) => cmp_f64(a, b),
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Total order over values. `nulls_max` places nulls (and missing) after
/// every other value; otherwise they come first.
pub fn compare_values(a: &Value, b: &Value, nulls_max: bool) -> Ordering {
    let a_null = a.is_null() || a.is_missing();
    let b_null = b.is_null() || b.is_missing();
    match (a_null, b_null) {
        (true, true) => return Ordering::Equal,
        (true, false) => {
            return if nulls_max {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            return if nulls_max {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => {}
    }
    let ra = class_rank(a.typ().kind());
    let rb = class_rank(b.typ().kind());
    if ra != rb {
        return ra.cmp(&rb);
    }
    if let (Some(na), Some(nb)) = (as_number(a), as_number(b)) {
        return compare_numbers(na, nb);
    }
    // Same class, non-numeric: payload bytes give a deterministic order.
    a.bytes().cmp(&b.bytes())
}

/// A direction-folding value comparator; "greater" means "later in the
/// configured stream order", with nulls at the end of the stream.
#[derive(Debug, Clone, Copy)]
pub struct ValueCompare {
    dir: SortDirection,
}

impl ValueCompare {
    pub fn new(dir: SortDirection) -> Self {
        Self { dir }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self.dir {
            SortDirection::Asc => compare_values(a, b, true),
            SortDirection::Desc => compare_values(a, b, false).reverse(),
        }
    }
}

/// One key of a multi-key comparator.
pub struct SortKey {
    pub expr: Arc<dyn Evaluator>,
    pub dir: SortDirection,
}

impl SortKey {
    pub fn new(expr: Arc<dyn Evaluator>, dir: SortDirection) -> Self {
        Self { expr, dir }
    }
}

/// Compares two records by evaluating each sort key in turn. Used to order
/// spill runs and to group equal key tuples during the merged read.
pub struct KeysComparator {
    keys: Vec<SortKey>,
}

impl KeysComparator {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn compare(&self, batch: &Batch, a: &Value, b: &Value) -> Ordering {
        for key in &self.keys {
            let va = key.expr.eval(batch, a);
            let vb = key.expr.eval(batch, b);
            let ord = match key.dir {
                SortDirection::Asc => compare_values(&va, &vb, true),
                SortDirection::Desc => compare_values(&va, &vb, false).reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::FieldRef;
    use crate::types::TypeContext;

    #[test]
    fn test_numeric_cross_compare() {
        let ctx = TypeContext::new();
        let i = Value::int64(&ctx, 2);
        let f = Value::float64(&ctx, 2.5);
        assert_eq!(compare_values(&i, &f, true), Ordering::Less);
        assert_eq!(compare_values(&f, &i, true), Ordering::Greater);
        assert_eq!(
            compare_values(&i, &Value::int64(&ctx, 2), true),
            Ordering::Equal
        );
    }

    #[test]
    fn test_nulls_position() {
        let ctx = TypeContext::new();
        let null = Value::null(ctx.type_int64());
        let one = Value::int64(&ctx, 1);
        assert_eq!(compare_values(&null, &one, true), Ordering::Greater);
        assert_eq!(compare_values(&null, &one, false), Ordering::Less);
        let missing = Value::missing(&ctx);
        assert_eq!(compare_values(&missing, &null, true), Ordering::Equal);
    }

    #[test]
    fn test_type_classes_separate() {
        let ctx = TypeContext::new();
        let n = Value::int64(&ctx, 1);
        let s = Value::string(&ctx, "1");
        assert_eq!(compare_values(&n, &s, true), Ordering::Less);
    }

    #[test]
    fn test_value_compare_direction() {
        let ctx = TypeContext::new();
        let a = Value::int64(&ctx, 1);
        let b = Value::int64(&ctx, 2);
        let asc = ValueCompare::new(SortDirection::Asc);
        let desc = ValueCompare::new(SortDirection::Desc);
        assert_eq!(asc.compare(&a, &b), Ordering::Less);
        assert_eq!(desc.compare(&a, &b), Ordering::Greater);
        // Nulls land at the end of the stream either way.
        let null = Value::null(ctx.type_int64());
        assert_eq!(asc.compare(&null, &b), Ordering::Greater);
        assert_eq!(desc.compare(&null, &b), Ordering::Greater);
    }

    #[test]
    fn test_keys_comparator() {
        let ctx = Arc::new(TypeContext::new());
        let cmp = KeysComparator::new(vec![
            SortKey::new(
                Arc::new(FieldRef::new(ctx.clone(), "a")),
                SortDirection::Asc,
            ),
            SortKey::new(
                Arc::new(FieldRef::new(ctx.clone(), "b")),
                SortDirection::Asc,
            ),
        ]);
        let batch = Batch::empty();
        let r1 = Value::record(
            &ctx,
            vec![
                ("a", Value::int64(&ctx, 1)),
                ("b", Value::string(&ctx, "x")),
            ],
        );
        let r2 = Value::record(
            &ctx,
            vec![
                ("a", Value::int64(&ctx, 1)),
                ("b", Value::string(&ctx, "y")),
            ],
        );
        assert_eq!(cmp.compare(&batch, &r1, &r2), Ordering::Less);
        assert_eq!(cmp.compare(&batch, &r1, &r1), Ordering::Equal);
    }
}
