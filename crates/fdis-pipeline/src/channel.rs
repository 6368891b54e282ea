//! # Completion-signaling channels
//!
//! The unit of inter-stage communication. A channel is an ordered queue with a
//! writing half ([`Sender`]) and a reading half ([`Receiver`]).
//!
//! - The writer signals completion exactly once, either explicitly with
//!   [`Sender::complete`] or implicitly when it is dropped. Because a task owns
//!   its output sender by value, every exit path of the task (success, error,
//!   cancellation, panic unwinding) completes the channel.
//! - The reader gets items in FIFO order until the channel is completed and
//!   drained, after which [`Receiver::recv`] returns `None` instead of waiting.
//! - Writing after completion fails with [`PipelineError::ChannelCompleted`].
//!
//! Channels are unbounded by default: the number of in-flight tasks is bounded
//! by the number of stages, not by queue depth. [`bounded`] creates a variant
//! whose writers suspend when the queue is full.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{ContentDescriptor, PipelineError};

/// Writing half of a content channel.
pub type ContentSender = Sender<ContentDescriptor>;
/// Reading half of a content channel.
pub type ContentReceiver = Receiver<ContentDescriptor>;

/// Create an unbounded channel.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Sender {
            inner: Some(SenderInner::Unbounded(tx)),
        },
        Receiver {
            inner: ReceiverInner::Unbounded(rx),
        },
    )
}

/// Create a bounded channel; `send` suspends while `capacity` items are queued.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Sender {
            inner: Some(SenderInner::Bounded(tx)),
        },
        Receiver {
            inner: ReceiverInner::Bounded(rx),
        },
    )
}

/// Unbounded when `capacity` is `None`, bounded otherwise.
pub fn with_capacity<T>(capacity: Option<usize>) -> (Sender<T>, Receiver<T>) {
    match capacity {
        Some(capacity) => bounded(capacity.max(1)),
        None => channel(),
    }
}

enum SenderInner<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>),
}

impl<T> Clone for SenderInner<T> {
    fn clone(&self) -> Self {
        match self {
            SenderInner::Unbounded(tx) => SenderInner::Unbounded(tx.clone()),
            SenderInner::Bounded(tx) => SenderInner::Bounded(tx.clone()),
        }
    }
}

/// Writing half of a channel.
///
/// A sender has exactly one owner. The only sanctioned multi-writer case is the
/// [`funnel`](crate::funnel), which shares its output sender internally.
pub struct Sender<T> {
    inner: Option<SenderInner<T>>,
}

impl<T> Sender<T> {
    /// Write one item.
    ///
    /// Only suspends for bounded channels that are full.
    pub async fn send(&self, item: T) -> Result<(), PipelineError> {
        match &self.inner {
            None => Err(PipelineError::ChannelCompleted),
            Some(SenderInner::Unbounded(tx)) => tx
                .send(item)
                .map_err(|_| PipelineError::ChannelClosed("receiver dropped")),
            Some(SenderInner::Bounded(tx)) => tx
                .send(item)
                .await
                .map_err(|_| PipelineError::ChannelClosed("receiver dropped")),
        }
    }

    /// Write one item, giving up if `token` is cancelled while waiting for
    /// room in a bounded channel.
    pub async fn send_cancellable(
        &self,
        item: T,
        token: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            res = self.send(item) => res,
        }
    }

    /// Signal that no more items will be written.
    ///
    /// Completing twice is a no-op; the first call is the one that counts.
    pub fn complete(&mut self) {
        self.inner = None;
    }

    pub fn is_completed(&self) -> bool {
        self.inner.is_none()
    }

    /// Whether the reading half has gone away.
    pub fn is_receiver_closed(&self) -> bool {
        match &self.inner {
            None => true,
            Some(SenderInner::Unbounded(tx)) => tx.is_closed(),
            Some(SenderInner::Bounded(tx)) => tx.is_closed(),
        }
    }

    /// Extra writer for the same channel. Only the funnel uses this; the
    /// channel completes once every share has completed or been dropped.
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("completed", &self.is_completed())
            .finish()
    }
}

enum ReceiverInner<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

/// Reading half of a channel.
pub struct Receiver<T> {
    inner: ReceiverInner<T>,
}

/// Result of a cancellable read.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    Item(T),
    /// The writer completed and every item has been read.
    Ended,
    /// The cancellation token fired first.
    Cancelled,
}

impl<T> Receiver<T> {
    /// A receiver whose channel is already completed and empty.
    pub fn empty() -> Self {
        let (_, rx) = channel();
        rx
    }

    /// Read the next item, or `None` once the channel is completed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.inner {
            ReceiverInner::Unbounded(rx) => rx.recv().await,
            ReceiverInner::Bounded(rx) => rx.recv().await,
        }
    }

    /// Read the next item unless `token` is cancelled first.
    ///
    /// Cancellation wins over queued items so cancelled tasks stop promptly.
    pub async fn recv_cancellable(&mut self, token: &CancellationToken) -> Received<T> {
        if token.is_cancelled() {
            return Received::Cancelled;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Received::Cancelled,
            item = self.recv() => match item {
                Some(item) => Received::Item(item),
                None => Received::Ended,
            },
        }
    }

    /// Drain the channel until it completes.
    pub async fn collect(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        match &self.inner {
            ReceiverInner::Unbounded(rx) => rx.len(),
            ReceiverInner::Bounded(rx) => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("queued", &self.len())
            .finish()
    }
}
