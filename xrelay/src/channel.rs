//! Bounded relay channel.
//!
//! The only synchronisation point between the collector and the
//! fragmenter. Buffers move through it by value, so whichever side holds a
//! [`MessageBuffer`] is its only owner. Both operations wait forever by
//! default; [`Wait`] lets a caller bound the wait or cancel it instead.

use core::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::MessageBuffer;
use crate::error::{Error, Result};

/// How long a channel operation may wait.
#[derive(Debug, Clone, Default)]
pub enum Wait {
    /// Wait until the operation completes or the channel closes.
    #[default]
    Forever,

    /// Give up with [`Error::Timeout`] after the duration.
    Timeout(Duration),

    /// Give up with [`Error::Cancelled`] once the token fires.
    Cancellable(CancellationToken),
}

impl Wait {
    /// Wait forever, or until `timeout` elapses when one is given.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(Wait::Forever, Wait::Timeout)
    }
}

/// A refused enqueue. The buffer is handed back to the caller.
pub struct EnqueueError {
    error: Error,
    buffer: MessageBuffer,
}

impl EnqueueError {
    /// Returns why the enqueue was refused.
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Returns the buffer that was not enqueued.
    pub fn into_buffer(self) -> MessageBuffer {
        self.buffer
    }

    /// Drops the buffer and keeps the error.
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueError")
            .field("error", &self.error)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enqueue of {} bytes refused: {}", self.buffer.len(), self.error)
    }
}

/// Creates a relay channel with `capacity` buffer slots.
pub fn relay_channel(capacity: NonZeroUsize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity.get());
    (
        RelaySender { inner: tx },
        RelayReceiver {
            inner: rx,
            capacity: capacity.get(),
        },
    )
}

/// Producer half. Clone it to feed the channel from several producers.
#[derive(Debug, Clone)]
pub struct RelaySender {
    inner: mpsc::Sender<MessageBuffer>,
}

impl RelaySender {
    /// Enqueues `buffer`, waiting as long as the channel is full.
    pub async fn enqueue(&self, buffer: MessageBuffer) -> core::result::Result<(), EnqueueError> {
        self.enqueue_with(buffer, &Wait::Forever).await
    }

    /// Enqueues `buffer`, waiting for a free slot according to `wait`.
    pub async fn enqueue_with(
        &self,
        buffer: MessageBuffer,
        wait: &Wait,
    ) -> core::result::Result<(), EnqueueError> {
        // Reserve first so a timeout or cancellation never consumes the buffer.
        let reserved = match wait {
            Wait::Forever => self.inner.reserve().await.map_err(|_| Error::ChannelClosed),
            Wait::Timeout(duration) => {
                match tokio::time::timeout(*duration, self.inner.reserve()).await {
                    Ok(permit) => permit.map_err(|_| Error::ChannelClosed),
                    Err(_) => Err(Error::Timeout),
                }
            }
            Wait::Cancellable(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    permit = self.inner.reserve() => permit.map_err(|_| Error::ChannelClosed),
                }
            }
        };

        match reserved {
            Ok(permit) => {
                permit.send(buffer);
                Ok(())
            }
            Err(error) => Err(EnqueueError { error, buffer }),
        }
    }

    /// Returns the number of buffers waiting in the channel.
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// Returns true if no buffer is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Returns true once the receiving half is gone.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct RelayReceiver {
    inner: mpsc::Receiver<MessageBuffer>,
    capacity: usize,
}

impl RelayReceiver {
    /// Takes the oldest buffer, waiting as long as the channel is empty.
    ///
    /// Fails with [`Error::ChannelClosed`] once every sender is gone and the
    /// channel has drained.
    pub async fn dequeue(&mut self) -> Result<MessageBuffer> {
        self.inner.recv().await.ok_or(Error::ChannelClosed)
    }

    /// Takes the oldest buffer, waiting according to `wait`.
    pub async fn dequeue_with(&mut self, wait: &Wait) -> Result<MessageBuffer> {
        match wait {
            Wait::Forever => self.dequeue().await,
            Wait::Timeout(duration) => tokio::time::timeout(*duration, self.inner.recv())
                .await
                .map_err(|_| Error::Timeout)?
                .ok_or(Error::ChannelClosed),
            Wait::Cancellable(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    buffer = self.inner.recv() => buffer.ok_or(Error::ChannelClosed),
                }
            }
        }
    }

    /// Returns the fixed number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBudget;

    fn buffer(budget: &MemoryBudget, data: &[u8]) -> MessageBuffer {
        MessageBuffer::copy_from(data, budget, 1024).unwrap()
    }

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let budget = MemoryBudget::unlimited();
        let (tx, mut rx) = relay_channel(capacity(4));

        for msg in [b"one".as_slice(), b"two", b"three"] {
            tx.enqueue(buffer(&budget, msg)).await.unwrap();
        }
        assert_eq!(tx.len(), 3);

        assert_eq!(rx.dequeue().await.unwrap().as_slice(), b"one");
        assert_eq!(rx.dequeue().await.unwrap().as_slice(), b"two");
        assert_eq!(rx.dequeue().await.unwrap().as_slice(), b"three");
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn test_full_channel_times_out_and_returns_buffer() {
        let budget = MemoryBudget::unlimited();
        let (tx, _rx) = relay_channel(capacity(1));

        tx.enqueue(buffer(&budget, b"first")).await.unwrap();

        let err = tx
            .enqueue_with(
                buffer(&budget, b"second"),
                &Wait::Timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.error(), Error::Timeout));
        assert_eq!(err.into_buffer().as_slice(), b"second");
        assert_eq!(tx.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_enqueue() {
        let budget = MemoryBudget::unlimited();
        let (tx, _rx) = relay_channel(capacity(1));
        tx.enqueue(buffer(&budget, b"first")).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let err = tx
            .enqueue_with(buffer(&budget, b"second"), &Wait::Cancellable(token))
            .await
            .unwrap_err();
        assert!(matches!(err.error(), Error::Cancelled));
    }

    #[tokio::test]
    async fn test_dequeue_timeout_and_cancel() {
        let (_tx, mut rx) = relay_channel(capacity(2));

        let result = rx
            .dequeue_with(&Wait::Timeout(Duration::from_millis(10)))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        let token = CancellationToken::new();
        token.cancel();
        let result = rx.dequeue_with(&Wait::Cancellable(token)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_closed() {
        let budget = MemoryBudget::unlimited();
        let (tx, mut rx) = relay_channel(capacity(2));

        tx.enqueue(buffer(&budget, b"last")).await.unwrap();
        drop(tx);

        // Buffered items drain before the close is reported.
        assert_eq!(rx.dequeue().await.unwrap().as_slice(), b"last");
        assert!(matches!(rx.dequeue().await, Err(Error::ChannelClosed)));

        let (tx, rx) = relay_channel(capacity(2));
        drop(rx);
        assert!(tx.is_closed());
        let err = tx.enqueue(buffer(&budget, b"x")).await.unwrap_err();
        assert!(matches!(err.into_error(), Error::ChannelClosed));
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_dequeue() {
        let budget = MemoryBudget::unlimited();
        let (tx, mut rx) = relay_channel(capacity(1));
        tx.enqueue(buffer(&budget, b"a")).await.unwrap();

        let producer = {
            let tx = tx.clone();
            let second = buffer(&budget, b"b");
            tokio::spawn(async move { tx.enqueue(second).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(rx.dequeue().await.unwrap().as_slice(), b"a");
        producer.await.unwrap().unwrap();
        assert_eq!(rx.dequeue().await.unwrap().as_slice(), b"b");
        assert_eq!(rx.capacity(), 1);
    }
}
