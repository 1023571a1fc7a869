//! Runtime context shared by operators
//!
//! Bundles the process-wide type context with the cooperative cancellation
//! signal every long-running loop observes. Cancellation is level
//! triggered: once set it stays set.

use crate::types::TypeContext;
use std::sync::Arc;
use tokio::sync::watch;

pub struct RuntimeContext {
    sctx: Arc<TypeContext>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::with_type_context(Arc::new(TypeContext::new()))
    }

    pub fn with_type_context(sctx: Arc<TypeContext>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            sctx,
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn type_context(&self) -> &Arc<TypeContext> {
        &self.sctx
    }

    /// Request cancellation of everything running under this context.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve once the context is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as the context, so this is
                // unreachable while anyone can still await us.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_flag() {
        let rctx = RuntimeContext::new();
        assert!(!rctx.is_cancelled());
        rctx.cancel();
        assert!(rctx.is_cancelled());
        rctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let rctx = Arc::new(RuntimeContext::new());
        let waiter = {
            let rctx = rctx.clone();
            tokio::spawn(async move { rctx.cancelled().await })
        };
        rctx.cancel();
        waiter.await.unwrap();
    }
}
