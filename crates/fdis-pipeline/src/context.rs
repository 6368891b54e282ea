//! Pipeline run context
//!
//! This module provides the context shared by every component of one pipeline
//! run: the run name, the cancellation token and the concurrency limit.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::PipelineError;

/// Shared context for one pipeline run.
///
/// Cloned into every spawned task. Components observe `token` at each of their
/// suspension points and take a permit from [`PipelineContext::acquire`] around
/// each unit of I/O work, which caps the number of in-flight units across the
/// whole run at the configured concurrency degree.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Name of the run, used in logs
    pub name: String,
    /// The cancellation token
    pub token: CancellationToken,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl PipelineContext {
    /// Create a new context allowing `concurrency` parallel units (at least 1).
    pub fn new(token: CancellationToken, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name: "fdis".to_string(),
            token,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn arc_new(token: CancellationToken, concurrency: usize) -> Arc<Self> {
        Arc::new(Self::new(token, concurrency))
    }

    pub fn with_name(name: impl Into<String>, token: CancellationToken, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            ..Self::new(token, concurrency)
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for an in-flight slot, or fail with `Cancelled`.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, PipelineError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(PipelineError::Cancelled),
            permit = self.permits.acquire() => {
                permit.map_err(|_| PipelineError::Cancelled)
            }
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new(CancellationToken::new(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_at_least_one() {
        let ctx = PipelineContext::new(CancellationToken::new(), 0);
        assert_eq!(ctx.concurrency(), 1);
        let _permit = ctx.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_waits_for_free_slot() {
        let ctx = PipelineContext::new(CancellationToken::new(), 1);
        let first = ctx.acquire().await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(20), ctx.acquire()).await;
        assert!(waiting.is_err());

        drop(first);
        assert!(ctx.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_observes_cancellation() {
        let ctx = PipelineContext::new(CancellationToken::new(), 1);
        let _held = ctx.acquire().await.unwrap();
        ctx.token.cancel();

        assert!(matches!(ctx.acquire().await, Err(PipelineError::Cancelled)));
    }
}
