//! # Funnel
//!
//! Merges several input streams into one output stream. One drain task runs
//! per source and forwards into the shared output channel, the one sanctioned
//! multi-writer channel in the engine. A shared counter tracks how many
//! sources are still open; the output completes when the last drain task
//! finishes.
//!
//! Order within a single source is preserved. Interleaving across sources is
//! first-arrival and otherwise unspecified.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::channel::{self, Received, Receiver, Sender};
use crate::PipelineError;

/// Spawn a funnel over `sources`.
///
/// Returns the merged receiver and a handle resolving to the number of items
/// forwarded. A failed or cancelled drain task does not stop the others; the
/// first error is reported once every drain task has finished.
pub fn funnel<T>(
    sources: Vec<Receiver<T>>,
    token: CancellationToken,
) -> (Receiver<T>, JoinHandle<Result<usize, PipelineError>>)
where
    T: Send + 'static,
{
    let (output, merged) = channel::channel();
    let task = tokio::spawn(run_funnel(sources, output, token));
    (merged, task)
}

async fn run_funnel<T: Send + 'static>(
    sources: Vec<Receiver<T>>,
    output: Sender<T>,
    token: CancellationToken,
) -> Result<usize, PipelineError> {
    let open_sources = Arc::new(AtomicUsize::new(sources.len()));
    let mut drains = JoinSet::new();

    for (index, source) in sources.into_iter().enumerate() {
        let output = output.share();
        let open_sources = open_sources.clone();
        let token = token.clone();
        drains.spawn(async move {
            let result = drain(index, source, &output, &token).await;
            let remaining = open_sources.fetch_sub(1, Ordering::AcqRel) - 1;
            trace!(source = index, remaining, "Funnel source finished");
            result
        });
    }
    // Only the drain tasks hold writers now; the output completes with the last one.
    drop(output);

    let mut forwarded = 0usize;
    let mut first_error = None;
    while let Some(joined) = drains.join_next().await {
        let result = joined.map_err(|e| PipelineError::TaskJoin(e.to_string()))?;
        match result {
            Ok(count) => forwarded += count,
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    debug!(forwarded, "Funnel finished");
    match first_error {
        Some(e) => Err(e),
        None => Ok(forwarded),
    }
}

async fn drain<T>(
    index: usize,
    mut source: Receiver<T>,
    output: &Sender<T>,
    token: &CancellationToken,
) -> Result<usize, PipelineError> {
    let mut count = 0usize;
    loop {
        match source.recv_cancellable(token).await {
            Received::Item(item) => {
                output.send(item).await?;
                count += 1;
            }
            Received::Ended => return Ok(count),
            Received::Cancelled => {
                debug!(source = index, forwarded = count, "Funnel drain cancelled");
                return Err(PipelineError::Cancelled);
            }
        }
    }
}
