//! External merge-sort over spilled record runs
//!
//! Each spill writes one sorted run file; reads are a k-way merge across
//! all runs in full-keys order. Run files hold framed self-describing
//! records, `uvarint(type_id) || uvarint(len) || payload`, so the reader
//! recovers each record's type from the shared type context. The whole
//! spill directory is scoped: `cleanup` removes it explicitly and dropping
//! the handle removes it on error or cancellation paths.

use super::Batch;
use crate::error::{EngineError, Result};
use crate::execution::RuntimeContext;
use crate::expr::KeysComparator;
use crate::types::TypeContext;
use crate::value::{flat, Value};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

pub struct MergeSort {
    ctx: Arc<TypeContext>,
    comparator: Arc<KeysComparator>,
    ectx: Batch,
    dir: TempDir,
    runs: Vec<RunReader>,
    nspills: usize,
}

impl MergeSort {
    /// Create the scoped spill directory under `spill_root`.
    pub fn new(
        ctx: Arc<TypeContext>,
        comparator: Arc<KeysComparator>,
        spill_root: &Path,
    ) -> Result<Self> {
        std::fs::create_dir_all(spill_root)?;
        let dir = tempfile::Builder::new()
            .prefix("tally-spill-")
            .tempdir_in(spill_root)?;
        Ok(Self {
            ctx,
            comparator,
            ectx: Batch::empty(),
            dir,
            runs: Vec::new(),
            nspills: 0,
        })
    }

    /// Sort `recs` by the full-keys comparator and append them as a new
    /// run.
    pub fn spill(&mut self, rctx: &RuntimeContext, mut recs: Vec<Value>) -> Result<()> {
        if rctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        recs.sort_by(|a, b| self.comparator.compare(&self.ectx, a, b));
        let path = self.dir.path().join(format!("run-{}.spill", self.nspills));
        self.nspills += 1;
        let mut w = BufWriter::new(File::create(&path)?);
        let mut frame = Vec::new();
        for rec in &recs {
            frame.clear();
            flat::put_uvarint(&mut frame, u64::from(rec.typ().id()));
            let payload = rec.bytes().unwrap_or(&[]);
            flat::put_uvarint(&mut frame, payload.len() as u64);
            w.write_all(&frame)?;
            w.write_all(payload)?;
        }
        w.flush()?;
        debug!(run = self.nspills, rows = recs.len(), "spilled sorted run");
        let mut run = RunReader {
            reader: BufReader::new(File::open(&path)?),
            current: None,
        };
        run.advance(&self.ctx)?;
        self.runs.push(run);
        Ok(())
    }

    /// The smallest record across all runs, without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Value>> {
        let idx = match self.min_run()? {
            Some(idx) => idx,
            None => return Ok(None),
        };
        Ok(self.runs[idx].current.as_ref())
    }

    /// Consume and return the smallest record across all runs.
    pub fn read(&mut self) -> Result<Option<Value>> {
        let idx = match self.min_run()? {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let rec = self.runs[idx].current.take();
        self.runs[idx].advance(&self.ctx)?;
        Ok(rec)
    }

    /// Remove the spill directory. Dropping the handle has the same
    /// effect; this form surfaces removal problems as a log line.
    pub fn cleanup(self) {
        if let Err(e) = self.dir.close() {
            warn!(error = %e, "failed to remove spill directory");
        }
    }

    // Index of the run holding the smallest current record. A linear scan:
    // spill fan-in is bounded by (input size / limit), which stays small in
    // practice.
    fn min_run(&self) -> Result<Option<usize>> {
        let mut min: Option<usize> = None;
        for idx in 0..self.runs.len() {
            let Some(cur) = &self.runs[idx].current else {
                continue;
            };
            min = match min {
                None => Some(idx),
                Some(best) => {
                    let best_val = self.runs[best]
                        .current
                        .as_ref()
                        .ok_or_else(|| EngineError::Internal("empty merge candidate".into()))?;
                    if self.comparator.compare(&self.ectx, cur, best_val)
                        == std::cmp::Ordering::Less
                    {
                        Some(idx)
                    } else {
                        Some(best)
                    }
                }
            };
        }
        Ok(min)
    }
}

struct RunReader {
    reader: BufReader<File>,
    current: Option<Value>,
}

impl RunReader {
    fn advance(&mut self, ctx: &TypeContext) -> Result<()> {
        let Some(type_id) = flat::read_uvarint(&mut self.reader)? else {
            self.current = None;
            return Ok(());
        };
        let len = flat::read_uvarint(&mut self.reader)?
            .ok_or_else(|| EngineError::Spill("truncated spill record".into()))?;
        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;
        let typ = ctx
            .type_by_id(type_id as u32)
            .ok_or_else(|| EngineError::Spill(format!("unknown spill type id {}", type_id)))?;
        self.current = Some(Value::new(typ, Some(Bytes::from(payload))));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{FieldRef, SortDirection, SortKey};

    fn comparator(ctx: &Arc<TypeContext>) -> Arc<KeysComparator> {
        Arc::new(KeysComparator::new(vec![SortKey::new(
            Arc::new(FieldRef::new(ctx.clone(), "a")),
            SortDirection::Asc,
        )]))
    }

    fn rec(ctx: &TypeContext, a: i64) -> Value {
        Value::record(ctx, vec![("a", Value::int64(ctx, a))])
    }

    #[tokio::test]
    async fn test_merge_order() {
        let ctx = Arc::new(TypeContext::new());
        let rctx = RuntimeContext::with_type_context(ctx.clone());
        let root = tempfile::tempdir().unwrap();
        let mut ms = MergeSort::new(ctx.clone(), comparator(&ctx), root.path()).unwrap();

        ms.spill(&rctx, vec![rec(&ctx, 5), rec(&ctx, 1)]).unwrap();
        ms.spill(&rctx, vec![rec(&ctx, 4), rec(&ctx, 2), rec(&ctx, 3)])
            .unwrap();

        let mut got = Vec::new();
        while let Some(r) = ms.read().unwrap() {
            got.push(r.field_at(0).unwrap().unwrap().as_int64().unwrap());
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let ctx = Arc::new(TypeContext::new());
        let rctx = RuntimeContext::with_type_context(ctx.clone());
        let root = tempfile::tempdir().unwrap();
        let mut ms = MergeSort::new(ctx.clone(), comparator(&ctx), root.path()).unwrap();
        ms.spill(&rctx, vec![rec(&ctx, 7)]).unwrap();

        assert!(ms.peek().unwrap().is_some());
        assert!(ms.peek().unwrap().is_some());
        assert!(ms.read().unwrap().is_some());
        assert!(ms.peek().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_dir() {
        let ctx = Arc::new(TypeContext::new());
        let rctx = RuntimeContext::with_type_context(ctx.clone());
        let root = tempfile::tempdir().unwrap();
        let mut ms = MergeSort::new(ctx.clone(), comparator(&ctx), root.path()).unwrap();
        ms.spill(&rctx, vec![rec(&ctx, 1)]).unwrap();
        let spill_dir = ms.dir.path().to_path_buf();
        assert!(spill_dir.is_dir());
        ms.cleanup();
        assert!(!spill_dir.exists());
    }
}
