//! # Broadcast
//!
//! Fans one input stream out to N independent receivers. Every item is copied
//! to every receiver, in receiver order, and every receiver observes the items
//! in the same order as the source. When the source completes, every receiver
//! is completed.
//!
//! Receivers are always owned by the pipeline itself, so a write failure (a
//! receiver dropped early) is treated as fatal for the whole broadcast task
//! and surfaced through its join handle.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::channel::{self, Received, Receiver, Sender};
use crate::PipelineError;

/// Counters reported by a finished broadcast task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Items read from the source.
    pub items: usize,
    /// Number of receivers each item was written to.
    pub receivers: usize,
}

/// Spawn a broadcast of `source` to `receiver_count` new channels.
///
/// Returns the receivers and the handle of the draining task. With zero
/// receivers the source is still drained so upstream writers never stall.
pub fn broadcast<T>(
    source: Receiver<T>,
    receiver_count: usize,
    token: CancellationToken,
) -> (
    Vec<Receiver<T>>,
    JoinHandle<Result<BroadcastStats, PipelineError>>,
)
where
    T: Clone + Send + 'static,
{
    let (senders, receivers): (Vec<Sender<T>>, Vec<Receiver<T>>) =
        (0..receiver_count).map(|_| channel::channel()).unzip();

    let task = tokio::spawn(run_broadcast(source, senders, token));
    (receivers, task)
}

async fn run_broadcast<T: Clone>(
    mut source: Receiver<T>,
    mut senders: Vec<Sender<T>>,
    token: CancellationToken,
) -> Result<BroadcastStats, PipelineError> {
    let mut stats = BroadcastStats {
        items: 0,
        receivers: senders.len(),
    };

    let result = loop {
        let item = match source.recv_cancellable(&token).await {
            Received::Item(item) => item,
            Received::Ended => break Ok(stats),
            Received::Cancelled => {
                debug!(items = stats.items, "Broadcast cancelled");
                break Err(PipelineError::Cancelled);
            }
        };
        stats.items += 1;

        if let Err(e) = write_to_all(&senders, item).await {
            error!(error = %e, "Broadcast write failed");
            break Err(e);
        }
    };

    // Complete every receiver on every exit path.
    for sender in &mut senders {
        sender.complete();
    }
    debug!(
        items = stats.items,
        receivers = stats.receivers,
        "Broadcast finished"
    );
    result
}

async fn write_to_all<T: Clone>(senders: &[Sender<T>], item: T) -> Result<(), PipelineError> {
    let Some((last, rest)) = senders.split_last() else {
        return Ok(());
    };
    for sender in rest {
        sender.send(item.clone()).await?;
    }
    last.send(item).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;

    #[tokio::test]
    async fn test_every_receiver_sees_every_item_in_order() {
        let (tx, rx) = channel();
        let (receivers, task) = broadcast(rx, 3, CancellationToken::new());

        for i in 0..10 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        for receiver in receivers {
            assert_eq!(receiver.collect().await, (0..10).collect::<Vec<_>>());
        }
        let stats = task.await.unwrap().unwrap();
        assert_eq!(
            stats,
            BroadcastStats {
                items: 10,
                receivers: 3
            }
        );
    }

    #[tokio::test]
    async fn test_receivers_stay_open_until_source_completes() {
        let (tx, rx) = channel();
        let (mut receivers, _task) = broadcast(rx, 2, CancellationToken::new());

        tx.send("first").await.unwrap();
        assert_eq!(receivers[0].recv().await, Some("first"));
        assert_eq!(receivers[1].recv().await, Some("first"));

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            receivers[0].recv(),
        )
        .await;
        assert!(pending.is_err(), "receiver must not end before the source");

        drop(tx);
        assert_eq!(receivers[0].recv().await, None);
        assert_eq!(receivers[1].recv().await, None);
    }

    #[tokio::test]
    async fn test_zero_receivers_still_drains_source() {
        let (tx, rx) = channel();
        let (receivers, task) = broadcast(rx, 0, CancellationToken::new());
        assert!(receivers.is_empty());

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        assert_eq!(task.await.unwrap().unwrap().items, 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_fails_the_broadcast() {
        let (tx, rx) = channel();
        let (mut receivers, task) = broadcast(rx, 2, CancellationToken::new());
        drop(receivers.pop());

        tx.send(1).await.unwrap();
        drop(tx);

        assert!(matches!(
            task.await.unwrap(),
            Err(PipelineError::ChannelClosed(_))
        ));
        // The surviving receiver is still completed.
        let survivor = receivers.pop().unwrap();
        assert_eq!(survivor.collect().await, vec![1]);
    }

    #[tokio::test]
    async fn test_cancellation_completes_receivers() {
        let (tx, rx) = channel::<u32>();
        let token = CancellationToken::new();
        let (receivers, task) = broadcast(rx, 2, token.clone());

        token.cancel();
        assert!(matches!(task.await.unwrap(), Err(PipelineError::Cancelled)));
        for receiver in receivers {
            assert!(receiver.collect().await.is_empty());
        }
        drop(tx);
    }
}
