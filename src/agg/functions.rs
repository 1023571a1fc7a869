//! Built-in aggregate function implementations

use super::AggFunc;
use crate::error::{EngineError, Result};
use crate::expr::compare::compare_values;
use crate::types::{Kind, TypeContext};
use crate::value::Value;
use hashbrown::HashSet;
use std::cmp::Ordering;

/// `count` - number of non-missing values.
#[derive(Default)]
pub struct Count {
    n: i64,
}

impl AggFunc for Count {
    fn consume(&mut self, val: &Value) {
        if !val.is_missing() {
            self.n += 1;
        }
    }

    fn consume_partial(&mut self, val: &Value) -> Result<()> {
        let n = val
            .as_int64()
            .map_err(|_| EngineError::Evaluation("count: bad partial".into()))?;
        self.n += n;
        Ok(())
    }

    fn result(&self, ctx: &TypeContext) -> Value {
        Value::int64(ctx, self.n)
    }

    fn result_partial(&self, ctx: &TypeContext) -> Value {
        self.result(ctx)
    }
}

enum NumState {
    Int(i64),
    Float(f64),
}

/// `sum` - numeric sum, int64 until a float64 arrives.
#[derive(Default)]
pub struct Sum {
    state: Option<NumState>,
}

impl Sum {
    fn add(&mut self, val: &Value) -> bool {
        match val.typ().kind() {
            Kind::Int64 => {
                if let Ok(v) = val.as_int64() {
                    self.state = Some(match self.state.take() {
                        None => NumState::Int(v),
                        Some(NumState::Int(acc)) => NumState::Int(acc.wrapping_add(v)),
                        Some(NumState::Float(acc)) => NumState::Float(acc + v as f64),
                    });
                    return true;
                }
                false
            }
            Kind::Float64 => {
                if let Ok(v) = val.as_float64() {
                    let acc = match self.state.take() {
                        None => 0.0,
                        Some(NumState::Int(acc)) => acc as f64,
                        Some(NumState::Float(acc)) => acc,
                    };
                    self.state = Some(NumState::Float(acc + v));
                    return true;
                }
                false
            }
            _ => false,
        }
    }
}

impl AggFunc for Sum {
    fn consume(&mut self, val: &Value) {
        self.add(val);
    }

    fn consume_partial(&mut self, val: &Value) -> Result<()> {
        if val.is_null() {
            return Ok(());
        }
        if !self.add(val) {
            return Err(EngineError::Evaluation("sum: bad partial".into()));
        }
        Ok(())
    }

    fn result(&self, ctx: &TypeContext) -> Value {
        match &self.state {
            None => Value::null(ctx.type_int64()),
            Some(NumState::Int(v)) => Value::int64(ctx, *v),
            Some(NumState::Float(v)) => Value::float64(ctx, *v),
        }
    }

    fn result_partial(&self, ctx: &TypeContext) -> Value {
        self.result(ctx)
    }
}

/// `avg` - arithmetic mean. The partial carries the decomposed
/// `{sum, count}` state so merges stay exact.
#[derive(Default)]
pub struct Avg {
    sum: f64,
    count: i64,
}

impl AggFunc for Avg {
    fn consume(&mut self, val: &Value) {
        if matches!(val.typ().kind(), Kind::Int64 | Kind::Float64) {
            if let Ok(v) = val.as_float64() {
                self.sum += v;
                self.count += 1;
            }
        }
    }

    fn consume_partial(&mut self, val: &Value) -> Result<()> {
        if val.is_null() {
            return Ok(());
        }
        let fields = val
            .typ()
            .fields()
            .ok_or_else(|| EngineError::Evaluation("avg: partial is not a record".into()))?;
        let sum_idx = fields.iter().position(|f| f.name == "sum");
        let count_idx = fields.iter().position(|f| f.name == "count");
        let (Some(sum_idx), Some(count_idx)) = (sum_idx, count_idx) else {
            return Err(EngineError::Evaluation("avg: bad partial layout".into()));
        };
        let sum = val
            .field_at(sum_idx)?
            .ok_or_else(|| EngineError::Evaluation("avg: bad partial".into()))?;
        let count = val
            .field_at(count_idx)?
            .ok_or_else(|| EngineError::Evaluation("avg: bad partial".into()))?;
        self.sum += sum.as_float64()?;
        self.count += count.as_int64()?;
        Ok(())
    }

    fn result(&self, ctx: &TypeContext) -> Value {
        if self.count == 0 {
            return Value::null(ctx.type_float64());
        }
        Value::float64(ctx, self.sum / self.count as f64)
    }

    fn result_partial(&self, ctx: &TypeContext) -> Value {
        Value::record(
            ctx,
            vec![
                ("sum", Value::float64(ctx, self.sum)),
                ("count", Value::int64(ctx, self.count)),
            ],
        )
    }
}

/// `min` / `max` - extremum under the total value order.
pub struct Extreme {
    want: Ordering,
    cur: Option<Value>,
}

impl Extreme {
    pub fn min() -> Self {
        Self {
            want: Ordering::Less,
            cur: None,
        }
    }

    pub fn max() -> Self {
        Self {
            want: Ordering::Greater,
            cur: None,
        }
    }

    fn update(&mut self, val: &Value) {
        if val.is_null() || val.is_error() {
            return;
        }
        match &self.cur {
            None => self.cur = Some(val.copy()),
            Some(cur) => {
                if compare_values(val, cur, true) == self.want {
                    self.cur = Some(val.copy());
                }
            }
        }
    }
}

impl AggFunc for Extreme {
    fn consume(&mut self, val: &Value) {
        self.update(val);
    }

    fn consume_partial(&mut self, val: &Value) -> Result<()> {
        self.update(val);
        Ok(())
    }

    fn result(&self, ctx: &TypeContext) -> Value {
        match &self.cur {
            Some(v) => v.clone(),
            None => Value::null(ctx.type_null()),
        }
    }

    fn result_partial(&self, ctx: &TypeContext) -> Value {
        self.result(ctx)
    }
}

/// `union` (distinct) and `collect` (every value, arrival order). The
/// partial is the list itself, so merging is concatenation with the same
/// dedup rule applied.
pub struct Distinct {
    distinct: bool,
    items: Vec<Value>,
    seen: HashSet<(u32, Option<Vec<u8>>)>,
}

impl Distinct {
    pub fn union() -> Self {
        Self {
            distinct: true,
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn collect() -> Self {
        Self {
            distinct: false,
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn push(&mut self, val: &Value) {
        if val.is_missing() {
            return;
        }
        if self.distinct {
            let key = (val.typ().id(), val.bytes().map(<[u8]>::to_vec));
            if !self.seen.insert(key) {
                return;
            }
        }
        self.items.push(val.copy());
    }

    fn make_list(&self, ctx: &TypeContext) -> Value {
        let Some(first) = self.items.first() else {
            return Value::null(ctx.lookup_list(ctx.type_null()));
        };
        let elem = first.typ().clone();
        if self.items.iter().any(|v| v.typ() != &elem) {
            return Value::error(ctx, "mixed-type collection unsupported");
        }
        Value::list(ctx, elem, &self.items)
    }
}

impl AggFunc for Distinct {
    fn consume(&mut self, val: &Value) {
        self.push(val);
    }

    fn consume_partial(&mut self, val: &Value) -> Result<()> {
        if val.is_null() {
            return Ok(());
        }
        if val.typ().list_elem().is_none() {
            return Err(EngineError::Evaluation("collection: bad partial".into()));
        }
        for item in val.elements()? {
            self.push(&item);
        }
        Ok(())
    }

    fn result(&self, ctx: &TypeContext) -> Value {
        self.make_list(ctx)
    }

    fn result_partial(&self, ctx: &TypeContext) -> Value {
        self.make_list(ctx)
    }
}

/// `any` - an arbitrary (first seen) non-null value.
#[derive(Default)]
pub struct Any {
    cur: Option<Value>,
}

impl AggFunc for Any {
    fn consume(&mut self, val: &Value) {
        if self.cur.is_none() && !val.is_null() && !val.is_missing() {
            self.cur = Some(val.copy());
        }
    }

    fn consume_partial(&mut self, val: &Value) -> Result<()> {
        self.consume(val);
        Ok(())
    }

    fn result(&self, ctx: &TypeContext) -> Value {
        match &self.cur {
            Some(v) => v.clone(),
            None => Value::null(ctx.type_null()),
        }
    }

    fn result_partial(&self, ctx: &TypeContext) -> Value {
        self.result(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count() {
        let ctx = TypeContext::new();
        let mut c = Count::default();
        c.consume(&Value::int64(&ctx, 1));
        c.consume(&Value::missing(&ctx));
        c.consume(&Value::string(&ctx, "x"));
        assert_eq!(c.result(&ctx).as_int64().unwrap(), 2);

        let mut other = Count::default();
        other.consume_partial(&c.result_partial(&ctx)).unwrap();
        other.consume(&Value::int64(&ctx, 9));
        assert_eq!(other.result(&ctx).as_int64().unwrap(), 3);
    }

    #[test]
    fn test_sum_widening() {
        let ctx = TypeContext::new();
        let mut s = Sum::default();
        s.consume(&Value::int64(&ctx, 10));
        s.consume(&Value::int64(&ctx, 20));
        assert_eq!(s.result(&ctx).as_int64().unwrap(), 30);
        s.consume(&Value::float64(&ctx, 0.5));
        assert_eq!(s.result(&ctx).as_float64().unwrap(), 30.5);
    }

    #[test]
    fn test_avg_partial_roundtrip() {
        let ctx = TypeContext::new();
        let mut a = Avg::default();
        a.consume(&Value::int64(&ctx, 1));
        a.consume(&Value::int64(&ctx, 2));
        let mut b = Avg::default();
        b.consume(&Value::int64(&ctx, 6));
        let mut merged = Avg::default();
        merged.consume_partial(&a.result_partial(&ctx)).unwrap();
        merged.consume_partial(&b.result_partial(&ctx)).unwrap();
        assert_eq!(merged.result(&ctx).as_float64().unwrap(), 3.0);
    }

    #[test]
    fn test_min_max() {
        let ctx = TypeContext::new();
        let mut mn = Extreme::min();
        let mut mx = Extreme::max();
        for v in [3i64, 1, 2] {
            mn.consume(&Value::int64(&ctx, v));
            mx.consume(&Value::int64(&ctx, v));
        }
        assert_eq!(mn.result(&ctx).as_int64().unwrap(), 1);
        assert_eq!(mx.result(&ctx).as_int64().unwrap(), 3);
        assert!(Extreme::min().result(&ctx).is_null());
    }

    #[test]
    fn test_union_distinct_and_partial() {
        let ctx = TypeContext::new();
        let mut u = Distinct::union();
        u.consume(&Value::int64(&ctx, 1));
        u.consume(&Value::int64(&ctx, 1));
        u.consume(&Value::int64(&ctx, 2));
        let list = u.result(&ctx);
        assert_eq!(list.elements().unwrap().len(), 2);

        let mut merged = Distinct::union();
        merged.consume_partial(&u.result_partial(&ctx)).unwrap();
        merged.consume(&Value::int64(&ctx, 2));
        merged.consume(&Value::int64(&ctx, 3));
        assert_eq!(merged.result(&ctx).elements().unwrap().len(), 3);
    }

    #[test]
    fn test_collect_keeps_duplicates() {
        let ctx = TypeContext::new();
        let mut c = Distinct::collect();
        c.consume(&Value::int64(&ctx, 5));
        c.consume(&Value::int64(&ctx, 5));
        assert_eq!(c.result(&ctx).elements().unwrap().len(), 2);
    }

    #[test]
    fn test_any() {
        let ctx = TypeContext::new();
        let mut a = Any::default();
        a.consume(&Value::null(ctx.type_int64()));
        a.consume(&Value::string(&ctx, "first"));
        a.consume(&Value::string(&ctx, "second"));
        assert_eq!(a.result(&ctx).as_str().unwrap(), "first");
    }
}
