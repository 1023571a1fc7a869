//! In-memory source operator

use super::{Batch, Puller};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;

/// A puller over in-memory batches, mainly for tests and local feeds.
///
/// A source can carry several sub-streams; each sub-stream ends with one
/// `None`, after which the next sub-stream begins. Once everything is
/// exhausted, every further pull returns `None`.
pub struct MemorySource {
    streams: VecDeque<VecDeque<Batch>>,
}

impl MemorySource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            streams: VecDeque::from(vec![VecDeque::from(batches)]),
        }
    }

    /// A source yielding several EOS-delimited sub-streams.
    pub fn with_streams(streams: Vec<Vec<Batch>>) -> Self {
        Self {
            streams: streams.into_iter().map(VecDeque::from).collect(),
        }
    }
}

#[async_trait]
impl Puller for MemorySource {
    async fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            self.streams.clear();
            return Ok(None);
        }
        let Some(stream) = self.streams.front_mut() else {
            return Ok(None);
        };
        match stream.pop_front() {
            Some(batch) => Ok(Some(batch)),
            None => {
                // Sub-stream exhausted: deliver its EOS, keep the rest.
                self.streams.pop_front();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeContext;
    use crate::value::Value;

    #[tokio::test]
    async fn test_single_stream() {
        let ctx = TypeContext::new();
        let batch = Batch::new(vec![Value::int64(&ctx, 1)]);
        let mut src = MemorySource::new(vec![batch]);
        assert!(src.pull(false).await.unwrap().is_some());
        assert!(src.pull(false).await.unwrap().is_none());
        assert!(src.pull(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sub_streams() {
        let ctx = TypeContext::new();
        let b = |v| Batch::new(vec![Value::int64(&ctx, v)]);
        let mut src = MemorySource::with_streams(vec![vec![b(1)], vec![b(2)]]);
        assert!(src.pull(false).await.unwrap().is_some());
        assert!(src.pull(false).await.unwrap().is_none());
        assert!(src.pull(false).await.unwrap().is_some());
        assert!(src.pull(false).await.unwrap().is_none());
        assert!(src.pull(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_done_clears() {
        let ctx = TypeContext::new();
        let mut src = MemorySource::new(vec![Batch::new(vec![Value::int64(&ctx, 1)])]);
        assert!(src.pull(true).await.unwrap().is_none());
        assert!(src.pull(false).await.unwrap().is_none());
    }
}
