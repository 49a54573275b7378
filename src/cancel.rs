//! Cooperative cancellation token passed down every pipeline call chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SubgenError};

/// Cancellation token observed at every pipeline checkpoint: before each
/// subprocess spawn, before each network batch call, and between VAD frame
/// batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call multiple times from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checkpoint: returns `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SubgenError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested. Used to race in-flight
    /// provider calls against cancellation.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_passes_before_cancel() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_checkpoint_fails_after_cancel() {
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(token.checkpoint(), Err(SubgenError::Cancelled)));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve promptly")
            .unwrap();
    }
}
