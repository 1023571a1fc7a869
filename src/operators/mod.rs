//! Pull-based operator plumbing
//!
//! Operators are pullers: the downstream calls `pull(false)` for the next
//! batch (`None` marks end of stream) and `pull(true)` to abandon the
//! iteration, which the operator must propagate upstream before going
//! quiet. Batches are refcounted containers of values; cloning a batch
//! shares its storage and dropping the last clone releases it.

mod aggregate;
mod memory;
mod spill;

pub use aggregate::{AggregateOp, AggregateOpBuilder};
pub use memory::MemorySource;
pub use spill::MergeSort;

use crate::error::Result;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// Target number of records per output batch.
pub const BATCH_LEN: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct Batch {
    values: Arc<Vec<Value>>,
}

impl Batch {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Mutable access to the values, available only while this is the sole
    /// reference to the batch (e.g. right after construction).
    pub fn values_mut(&mut self) -> Option<&mut Vec<Value>> {
        Arc::get_mut(&mut self.values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The pull contract between operators.
#[async_trait]
pub trait Puller: Send {
    /// Pull the next batch; `None` is end of stream. `done = true` tells
    /// the operator the caller is abandoning the iteration: it must
    /// release its resources, propagate the `done` upstream, and return.
    async fn pull(&mut self, done: bool) -> Result<Option<Batch>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeContext;

    #[test]
    fn test_batch_sharing() {
        let ctx = TypeContext::new();
        let mut batch = Batch::new(vec![Value::int64(&ctx, 1)]);
        assert!(batch.values_mut().is_some());
        let shared = batch.clone();
        assert!(batch.values_mut().is_none());
        assert_eq!(shared.len(), 1);
    }
}
