//! Group-by aggregation operator
//!
//! The operator groups a stream of self-describing records by the values
//! of its key expressions and maintains one set of aggregate states per
//! group. Group identity is the flat encoding of the evaluated key tuple
//! suffixed with the interned id of the key type vector, so the same key
//! bytes under different types form different groups.
//!
//! When the in-memory table reaches its limit the table is drained into a
//! sorted run of partial-aggregate records; results are then produced by a
//! k-way merge that recombines partials per key tuple. With sorted input
//! the operator emits completed groups while still consuming, bounded by
//! the largest primary key seen so far.

use super::spill::MergeSort;
use super::{Batch, Puller, BATCH_LEN};
use crate::agg::{AggFunc, AggSpec};
use crate::error::{EngineError, Result};
use crate::execution::{ExecutionConfig, RuntimeContext};
use crate::expr::{
    Evaluator, FieldPath, FieldRef, KeysComparator, NoopResetter, Resetter, SortDirection,
    SortKey, ValueCompare,
};
use crate::types::{Type, TypeVectorTable};
use crate::value::{flat, RecordBuilder, Value};
use async_trait::async_trait;
use hashbrown::HashMap;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type PullResult = Result<Option<Batch>>;

// ============================================================================
// Builder
// ============================================================================

/// Configures and constructs an [`AggregateOp`].
pub struct AggregateOpBuilder {
    keys: Vec<(FieldPath, Arc<dyn Evaluator>)>,
    aggs: Vec<(FieldPath, AggSpec)>,
    limit: Option<usize>,
    input_dir: Option<SortDirection>,
    partials_in: bool,
    partials_out: bool,
    resetter: Option<Box<dyn Resetter>>,
    config: ExecutionConfig,
}

impl AggregateOpBuilder {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            aggs: Vec::new(),
            limit: None,
            input_dir: None,
            partials_in: false,
            partials_out: false,
            resetter: None,
            config: ExecutionConfig::default(),
        }
    }

    /// Add a grouping key: the output path it lands on and the expression
    /// computing it from the input.
    pub fn key(mut self, path: impl Into<FieldPath>, expr: Arc<dyn Evaluator>) -> Self {
        self.keys.push((path.into(), expr));
        self
    }

    /// Add an aggregate: the output path it lands on and its call spec.
    pub fn agg(mut self, path: impl Into<FieldPath>, spec: AggSpec) -> Self {
        self.aggs.push((path.into(), spec));
        self
    }

    /// Override the in-memory group limit before spilling.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Declare the input sorted by the primary key in this direction,
    /// enabling early emission of completed groups.
    pub fn input_dir(mut self, dir: SortDirection) -> Self {
        self.input_dir = Some(dir);
        self
    }

    /// Treat each input record as a pre-aggregated partial.
    pub fn partials_in(mut self, on: bool) -> Self {
        self.partials_in = on;
        self
    }

    /// Emit partials for a downstream merging operator.
    pub fn partials_out(mut self, on: bool) -> Self {
        self.partials_out = on;
        self
    }

    pub fn resetter(mut self, resetter: Box<dyn Resetter>) -> Self {
        self.resetter = Some(resetter);
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, rctx: Arc<RuntimeContext>, parent: Box<dyn Puller>) -> Result<AggregateOp> {
        if self.input_dir.is_some() && self.keys.is_empty() {
            return Err(EngineError::Config(
                "sorted input requires at least one grouping key".into(),
            ));
        }
        let limit = self.limit.unwrap_or(self.config.group_limit);
        if limit == 0 {
            return Err(EngineError::Config("group limit must be positive".into()));
        }
        let sctx = rctx.type_context().clone();
        let mut names: Vec<FieldPath> = self.keys.iter().map(|(p, _)| p.clone()).collect();
        names.extend(self.aggs.iter().map(|(p, _)| p.clone()));
        let builder = RecordBuilder::new(sctx.clone(), &names)?;

        let key_refs: Vec<Arc<dyn Evaluator>> = self
            .keys
            .iter()
            .map(|(p, _)| Arc::new(FieldRef::new(sctx.clone(), p.clone())) as Arc<dyn Evaluator>)
            .collect();
        let key_exprs: Vec<Arc<dyn Evaluator>> =
            self.keys.iter().map(|(_, e)| e.clone()).collect();
        let agg_refs: Vec<Arc<dyn Evaluator>> = self
            .aggs
            .iter()
            .map(|(p, _)| Arc::new(FieldRef::new(sctx.clone(), p.clone())) as Arc<dyn Evaluator>)
            .collect();
        let aggs: Vec<AggSpec> = self.aggs.into_iter().map(|(_, s)| s).collect();

        let sort_dir = self.input_dir.unwrap_or(SortDirection::Asc);
        let value_compare = self.input_dir.map(ValueCompare::new);
        let key_compare = if self.input_dir.is_some() {
            Some(Arc::new(KeysComparator::new(vec![SortKey::new(
                key_refs[0].clone(),
                sort_dir,
            )])))
        } else {
            None
        };
        let keys_comparator = Arc::new(KeysComparator::new(
            key_refs
                .iter()
                .map(|e| SortKey::new(e.clone(), sort_dir))
                .collect(),
        ));

        let agg = Aggregator {
            rctx: rctx.clone(),
            key_types: TypeVectorTable::new(),
            out_types: TypeVectorTable::new(),
            key_refs,
            key_exprs,
            agg_refs,
            aggs,
            builder,
            record_types: HashMap::new(),
            table: HashMap::new(),
            key_scratch: Vec::with_capacity(128),
            type_scratch: Vec::new(),
            limit,
            value_compare,
            key_compare,
            keys_comparator,
            max_table_key: None,
            max_spill_key: None,
            input_dir: self.input_dir,
            spill_root: self.config.spill_path,
            spiller: None,
            partials_in: self.partials_in,
            partials_out: self.partials_out,
        };

        let (req_tx, req_rx) = mpsc::channel(1);
        let producer = Producer {
            rctx: rctx.clone(),
            parent,
            resetter: self.resetter.unwrap_or_else(|| Box::new(NoopResetter)),
            agg,
            req_rx,
            batch: None,
        };
        Ok(AggregateOp {
            rctx,
            producer: Some(producer),
            req_tx,
        })
    }
}

impl Default for AggregateOpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Aggregator core
// ============================================================================

struct Row {
    key_type: usize,
    group_val: Option<Value>,
    funcs: Vec<Box<dyn AggFunc>>,
}

struct Aggregator {
    rctx: Arc<RuntimeContext>,
    // key_types decides group identity; out_types tracks the combined key
    // and aggregate output types for record-type memoization.
    key_types: TypeVectorTable,
    out_types: TypeVectorTable,
    key_refs: Vec<Arc<dyn Evaluator>>,
    key_exprs: Vec<Arc<dyn Evaluator>>,
    agg_refs: Vec<Arc<dyn Evaluator>>,
    aggs: Vec<AggSpec>,
    builder: RecordBuilder,
    record_types: HashMap<usize, Type>,
    table: HashMap<Vec<u8>, Row>,
    key_scratch: Vec<u8>,
    type_scratch: Vec<Type>,
    limit: usize,
    value_compare: Option<ValueCompare>,
    key_compare: Option<Arc<KeysComparator>>,
    keys_comparator: Arc<KeysComparator>,
    max_table_key: Option<Value>,
    max_spill_key: Option<Value>,
    input_dir: Option<SortDirection>,
    spill_root: PathBuf,
    spiller: Option<MergeSort>,
    partials_in: bool,
    partials_out: bool,
}

// Raise `slot` to `v` if `v` is larger under `vc`, returning an owning
// copy of the current maximum.
fn update_max(slot: &mut Option<Value>, vc: &ValueCompare, v: &Value) -> Value {
    match slot {
        Some(max) if vc.compare(v, max) != Ordering::Greater => max.clone(),
        _ => {
            let copy = v.copy();
            *slot = Some(copy.clone());
            copy
        }
    }
}

impl Aggregator {
    /// Fold one input record into its group, spilling first if the table
    /// is at its limit and the record starts a new group.
    fn consume(&mut self, batch: &Batch, this: &Value) -> Result<()> {
        let mut types = std::mem::take(&mut self.type_scratch);
        types.clear();
        let mut key = std::mem::take(&mut self.key_scratch);
        key.clear();

        let mut prim: Option<Value> = None;
        for (i, expr) in self.key_exprs.iter().enumerate() {
            let kv = expr.eval(batch, this);
            if kv.is_quiet() {
                self.type_scratch = types;
                self.key_scratch = key;
                return Ok(());
            }
            if i == 0 && self.input_dir.is_some() {
                if let Some(vc) = &self.value_compare {
                    prim = Some(update_max(&mut self.max_table_key, vc, &kv));
                }
            }
            types.push(kv.typ().clone());
            // Keys append as flat payloads whether primitive or container;
            // structure comes back from the type vector at emit time.
            flat::append(&mut key, kv.bytes());
        }
        // The type id suffix makes the key type part of group identity.
        let key_type = self.key_types.lookup(&types);
        flat::put_uvarint(&mut key, key_type as u64);

        if !self.table.contains_key(key.as_slice()) {
            if self.table.len() >= self.limit {
                self.spill_table(false, batch)?;
            }
            let funcs = self.aggs.iter().map(AggSpec::instantiate).collect();
            self.table.insert(
                key.clone(),
                Row {
                    key_type,
                    group_val: prim,
                    funcs,
                },
            );
        }
        let Some(row) = self.table.get_mut(key.as_slice()) else {
            return Err(EngineError::Internal("group row missing after insert".into()));
        };

        if self.partials_in {
            for (i, rf) in self.agg_refs.iter().enumerate() {
                let v = rf.eval(batch, this);
                if v.is_missing() {
                    continue;
                }
                row.funcs[i].consume_partial(&v)?;
            }
        } else {
            for (i, spec) in self.aggs.iter().enumerate() {
                spec.apply(batch, row.funcs[i].as_mut(), this);
            }
        }

        self.type_scratch = types;
        self.key_scratch = key;
        Ok(())
    }

    /// Drain the in-memory table into a sorted spill run (in partials-out
    /// form so merges recombine partials).
    fn spill_table(&mut self, eof: bool, batch: &Batch) -> Result<()> {
        let Some(drained) = self.read_table(true, true)? else {
            return Ok(());
        };
        if self.spiller.is_none() {
            self.spiller = Some(MergeSort::new(
                self.rctx.type_context().clone(),
                self.keys_comparator.clone(),
                &self.spill_root,
            )?);
        }
        let recs: Vec<Value> = drained.values().to_vec();
        debug!(groups = recs.len(), eof, "spilling group table");

        // Track the largest primary key entering the spill before the
        // records move into the run.
        let mut spill_max: Option<Value> = None;
        if !eof && self.input_dir.is_some() {
            if let Some(vc) = &self.value_compare {
                for rec in &recs {
                    let v = self.key_refs[0].eval(batch, rec);
                    if v.is_error() {
                        continue;
                    }
                    let larger = match &spill_max {
                        None => true,
                        Some(m) => vc.compare(&v, m) == Ordering::Greater,
                    };
                    if larger {
                        spill_max = Some(v.copy());
                    }
                }
            }
        }

        if let Some(spiller) = self.spiller.as_mut() {
            spiller.spill(&self.rctx, recs)?;
        }
        if let (Some(v), Some(vc)) = (spill_max, &self.value_compare) {
            update_max(&mut self.max_spill_key, vc, &v);
        }
        Ok(())
    }

    /// Produce the next batch of results. At EOF this must be called until
    /// it returns `None`. Before EOF it may only be called in sorted mode,
    /// where it returns groups whose primary key is already complete.
    fn next_result(&mut self, eof: bool, batch: &Batch) -> Result<Option<Batch>> {
        if self.spiller.is_none() {
            return self.read_table(eof, self.partials_out);
        }
        if eof {
            // Spill the remainder so all groups merge through one path.
            self.spill_table(true, batch)?;
        }
        self.read_spills(eof, batch)
    }

    fn read_spills(&mut self, eof: bool, batch: &Batch) -> Result<Option<Batch>> {
        if !eof && self.input_dir.is_none() {
            return Ok(None);
        }
        let mut recs = Vec::with_capacity(BATCH_LEN);
        while recs.len() < BATCH_LEN {
            if self.rctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if !eof && self.input_dir.is_some() {
                // A key class at or past the spill watermark may still
                // receive data; stop before it.
                let rec = {
                    let Some(spiller) = self.spiller.as_mut() else {
                        break;
                    };
                    match spiller.peek()? {
                        Some(r) => r.clone(),
                        None => break,
                    }
                };
                let Some(max) = self.max_spill_key.clone() else {
                    break;
                };
                let Some(vc) = self.value_compare else {
                    break;
                };
                let key_val = self.key_refs[0].eval(batch, &rec);
                if !key_val.is_error() && vc.compare(&key_val, &max) != Ordering::Less {
                    break;
                }
            }
            match self.next_result_from_spills(batch)? {
                Some(rec) => recs.push(rec),
                None => break,
            }
        }
        if recs.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(recs)))
    }

    // Merge the maximal run of spill records sharing one key tuple into a
    // single output record by recombining their partials on fresh states.
    fn next_result_from_spills(&mut self, batch: &Batch) -> Result<Option<Value>> {
        let mut funcs: Vec<Box<dyn AggFunc>> =
            self.aggs.iter().map(AggSpec::instantiate).collect();
        let mut first: Option<Value> = None;
        loop {
            let rec = {
                let Some(spiller) = self.spiller.as_mut() else {
                    break;
                };
                match spiller.peek()? {
                    Some(r) => r.clone(),
                    None => break,
                }
            };
            match &first {
                None => first = Some(rec.copy()),
                Some(f) => {
                    if self.keys_comparator.compare(batch, f, &rec) != Ordering::Equal {
                        break;
                    }
                }
            }
            for (i, rf) in self.agg_refs.iter().enumerate() {
                let v = rf.eval(batch, &rec);
                if v.is_missing() {
                    continue;
                }
                funcs[i].consume_partial(&v)?;
            }
            if let Some(spiller) = self.spiller.as_mut() {
                spiller.read()?;
            }
        }
        let Some(first) = first else {
            return Ok(None);
        };

        self.builder.reset();
        let mut types: Vec<Type> = Vec::with_capacity(self.key_refs.len() + funcs.len());
        for rf in &self.key_refs {
            let kv = rf.eval(batch, &first);
            types.push(kv.typ().clone());
            self.builder.append(kv.bytes());
        }
        let sctx = self.rctx.type_context().clone();
        for func in &funcs {
            let v = if self.partials_out {
                func.result_partial(&sctx)
            } else {
                func.result(&sctx)
            };
            types.push(v.typ().clone());
            self.builder.append(v.bytes());
        }
        let typ = self.lookup_record_type(&types)?;
        let bytes = self.builder.encode()?;
        Ok(Some(Value::new(typ, Some(bytes))))
    }

    /// Emit records from the in-memory table. With `flush` everything
    /// goes; otherwise (sorted mode) only groups whose primary key is
    /// strictly below the watermark, since later input can no longer
    /// touch them.
    fn read_table(&mut self, flush: bool, partials_out: bool) -> Result<Option<Batch>> {
        if !flush && self.value_compare.is_none() {
            return Err(EngineError::Internal(
                "tried to fetch completed tuples on unsorted input".into(),
            ));
        }
        let keys: Vec<Vec<u8>> = if flush {
            self.table.keys().cloned().collect()
        } else {
            let Some(max) = self.max_table_key.clone() else {
                return Ok(None);
            };
            let Some(vc) = self.value_compare else {
                return Ok(None);
            };
            self.table
                .iter()
                .filter(|(_, row)| match &row.group_val {
                    Some(gv) => vc.compare(gv, &max) == Ordering::Less,
                    None => false,
                })
                .map(|(k, _)| k.clone())
                .collect()
        };
        if keys.is_empty() {
            return Ok(None);
        }
        let mut recs = Vec::with_capacity(keys.len());
        for key in keys {
            if self.rctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            // Remove as we emit so state shifts from the table to the
            // output records instead of being held twice.
            let Some(row) = self.table.remove(&key) else {
                continue;
            };
            recs.push(self.build_row_record(&key, &row, partials_out)?);
        }
        Ok(Some(Batch::new(recs)))
    }

    fn build_row_record(&mut self, key: &[u8], row: &Row, partials_out: bool) -> Result<Value> {
        self.builder.reset();
        let key_types = self.key_types.types(row.key_type).clone();
        let mut types: Vec<Type> = Vec::with_capacity(key_types.len() + row.funcs.len());
        // The iterator stops before the type-id suffix because we visit
        // exactly one item per key type.
        let mut it = flat::Iter::new(key);
        for typ in key_types.iter() {
            let item = it.next()?;
            self.builder.append(item);
            types.push(typ.clone());
        }
        let sctx = self.rctx.type_context().clone();
        for func in &row.funcs {
            let v = if partials_out {
                func.result_partial(&sctx)
            } else {
                func.result(&sctx)
            };
            types.push(v.typ().clone());
            self.builder.append(v.bytes());
        }
        let typ = self.lookup_record_type(&types)?;
        let bytes = self.builder.encode()?;
        Ok(Value::new(typ, Some(bytes)))
    }

    // Output record types can vary per row (aggregate output types depend
    // on the values), so memoize them by out-type-vector id.
    fn lookup_record_type(&mut self, types: &[Type]) -> Result<Type> {
        let id = self.out_types.lookup(types);
        if let Some(typ) = self.record_types.get(&id) {
            return Ok(typ.clone());
        }
        let typ = self.builder.record_type(types)?;
        self.record_types.insert(id, typ.clone());
        Ok(typ)
    }
}

// ============================================================================
// Operator driver
// ============================================================================

/// The pull-facing aggregation operator.
///
/// The first `pull(false)` spawns a producer task that pulls the upstream,
/// feeds the aggregator, and hands result batches over in rendezvous
/// fashion: each result is produced against one queued request, so nothing
/// computed before a `done` can be delivered after it. `pull(true)`
/// abandons the iteration: the producer releases its spill files,
/// propagates the `done` upstream, and goes quiet.
pub struct AggregateOp {
    rctx: Arc<RuntimeContext>,
    producer: Option<Producer>,
    req_tx: mpsc::Sender<Request>,
}

enum Request {
    Next(oneshot::Sender<PullResult>),
    Done,
}

#[async_trait]
impl Puller for AggregateOp {
    async fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            return tokio::select! {
                _ = self.req_tx.send(Request::Done) => Ok(None),
                _ = self.rctx.cancelled() => Err(EngineError::Cancelled),
            };
        }
        if let Some(producer) = self.producer.take() {
            tokio::spawn(producer.run());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.req_tx.send(Request::Next(reply_tx)).await.is_err() {
            // Producer already terminated.
            return self.terminal_result();
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => self.terminal_result(),
        }
    }
}

impl AggregateOp {
    fn terminal_result(&self) -> PullResult {
        if self.rctx.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(None)
        }
    }
}

enum SendStatus {
    /// Result delivered; keep producing.
    Sent,
    /// Downstream abandoned the iteration; the current drain stops but the
    /// producer keeps serving any replayed stream.
    Done,
    /// Stop the producer.
    Fatal,
}

struct Producer {
    rctx: Arc<RuntimeContext>,
    parent: Box<dyn Puller>,
    resetter: Box<dyn Resetter>,
    agg: Aggregator,
    req_rx: mpsc::Receiver<Request>,
    batch: Option<Batch>,
}

impl Producer {
    async fn run(mut self) {
        self.run_loop().await;
        // Spill files must be gone before the operator yields its final
        // result; closing the request channel then resolves any pending
        // pull with end of stream.
        if let Some(spiller) = self.agg.spiller.take() {
            spiller.cleanup();
        }
    }

    async fn run_loop(&mut self) {
        loop {
            let batch = match self.parent.pull(false).await {
                Err(e) => {
                    if matches!(self.send_result(Err(e)).await, SendStatus::Fatal) {
                        return;
                    }
                    continue;
                }
                Ok(None) => {
                    if !self.drain_results().await {
                        return;
                    }
                    self.batch = None;
                    continue;
                }
                Ok(Some(batch)) => batch,
            };
            // Hold the first batch of the stream as the evaluation context
            // for result building.
            if self.batch.is_none() {
                self.batch = Some(batch.clone());
            }
            for val in batch.values() {
                if let Err(e) = self.agg.consume(&batch, val) {
                    let _ = self.send_result(Err(e)).await;
                    return;
                }
            }
            if self.agg.input_dir.is_none() {
                continue;
            }
            // Sorted input: emit any keys completed by this batch.
            loop {
                match self.agg.next_result(false, &batch) {
                    Err(e) => {
                        if matches!(self.send_result(Err(e)).await, SendStatus::Fatal) {
                            return;
                        }
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(mut out)) => {
                        if let Some(cmp) = self.agg.key_compare.clone() {
                            if let Some(vals) = out.values_mut() {
                                vals.sort_by(|a, b| cmp.compare(&batch, a, b));
                            }
                        }
                        match self.send_result(Ok(Some(out))).await {
                            SendStatus::Sent => {}
                            SendStatus::Done => break,
                            SendStatus::Fatal => return,
                        }
                    }
                }
            }
        }
    }

    // Drain all results at end of stream, closing with an EOS marker.
    // Returns false when the producer must stop.
    async fn drain_results(&mut self) -> bool {
        loop {
            let batch = self.batch.clone().unwrap_or_else(Batch::empty);
            match self.agg.next_result(true, &batch) {
                Err(e) => {
                    return !matches!(self.send_result(Err(e)).await, SendStatus::Fatal);
                }
                Ok(None) => {
                    return !matches!(self.send_result(Ok(None)).await, SendStatus::Fatal);
                }
                Ok(Some(out)) => match self.send_result(Ok(Some(out))).await {
                    SendStatus::Sent => {}
                    SendStatus::Done => return true,
                    SendStatus::Fatal => return false,
                },
            }
        }
    }

    // Rendezvous with the downstream: block until it asks for the next
    // result or abandons the iteration, racing against cancellation.
    async fn send_result(&mut self, result: PullResult) -> SendStatus {
        // EOS and error results close out a stream: reset stateful
        // expressions before the downstream sees the marker.
        if !matches!(&result, Ok(Some(_))) {
            self.resetter.reset();
        }
        let request = tokio::select! {
            request = self.req_rx.recv() => request,
            _ = self.rctx.cancelled() => return SendStatus::Fatal,
        };
        match request {
            // The operator handle was dropped.
            None => SendStatus::Fatal,
            Some(Request::Next(reply)) => {
                let _ = reply.send(result);
                SendStatus::Sent
            }
            Some(Request::Done) => self.handle_done().await,
        }
    }

    // Downstream abandoned the iteration: release everything, propagate
    // the done upstream, and surface any upstream error.
    async fn handle_done(&mut self) -> SendStatus {
        self.reset_state();
        match self.parent.pull(true).await {
            Err(e) => {
                let request = tokio::select! {
                    request = self.req_rx.recv() => request,
                    _ = self.rctx.cancelled() => return SendStatus::Fatal,
                };
                if let Some(Request::Next(reply)) = request {
                    let _ = reply.send(Err(e));
                }
                SendStatus::Fatal
            }
            Ok(_) => SendStatus::Done,
        }
    }

    fn reset_state(&mut self) {
        if let Some(spiller) = self.agg.spiller.take() {
            spiller.cleanup();
        }
        self.agg.table.clear();
        self.agg.max_table_key = None;
        self.agg.max_spill_key = None;
        self.batch = None;
        self.resetter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::AggKind;
    use crate::operators::MemorySource;
    use crate::types::TypeContext;

    fn rec(ctx: &TypeContext, a: i64) -> Value {
        Value::record(ctx, vec![("a", Value::int64(ctx, a))])
    }

    #[tokio::test]
    async fn test_count_by_key() {
        let rctx = Arc::new(RuntimeContext::new());
        let ctx = rctx.type_context().clone();
        let input = Batch::new(vec![rec(&ctx, 1), rec(&ctx, 2), rec(&ctx, 1)]);
        let source = MemorySource::new(vec![input]);
        let mut op = AggregateOpBuilder::new()
            .key("a", Arc::new(FieldRef::new(ctx.clone(), "a")))
            .agg("count", AggSpec::new(AggKind::Count, None))
            .build(rctx, Box::new(source))
            .unwrap();

        let mut rows: Vec<String> = Vec::new();
        while let Some(batch) = op.pull(false).await.unwrap() {
            rows.extend(batch.values().iter().map(|v| v.to_string()));
        }
        rows.sort();
        assert_eq!(rows, vec!["{a:1,count:2}", "{a:2,count:1}"]);
    }

    #[tokio::test]
    async fn test_keyless_aggregation() {
        let rctx = Arc::new(RuntimeContext::new());
        let ctx = rctx.type_context().clone();
        let input = Batch::new(vec![rec(&ctx, 1), rec(&ctx, 2), rec(&ctx, 3)]);
        let mut op = AggregateOpBuilder::new()
            .agg("count", AggSpec::new(AggKind::Count, None))
            .build(rctx, Box::new(MemorySource::new(vec![input])))
            .unwrap();

        let batch = op.pull(false).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.values()[0].to_string(), "{count:3}");
        assert!(op.pull(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sorted_input_requires_key() {
        let rctx = Arc::new(RuntimeContext::new());
        let source = MemorySource::new(vec![]);
        let err = AggregateOpBuilder::new()
            .agg("count", AggSpec::new(AggKind::Count, None))
            .input_dir(SortDirection::Asc)
            .build(rctx, Box::new(source));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let rctx = Arc::new(RuntimeContext::new());
        let source = MemorySource::new(vec![]);
        let err = AggregateOpBuilder::new()
            .agg("count", AggSpec::new(AggKind::Count, None))
            .limit(0)
            .build(rctx, Box::new(source));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_conflicting_output_paths_rejected() {
        let rctx = Arc::new(RuntimeContext::new());
        let ctx = rctx.type_context().clone();
        let source = MemorySource::new(vec![]);
        let err = AggregateOpBuilder::new()
            .key("a", Arc::new(FieldRef::new(ctx.clone(), "a")))
            .agg("a", AggSpec::new(AggKind::Count, None))
            .build(rctx, Box::new(source));
        assert!(err.is_err());
    }
}
