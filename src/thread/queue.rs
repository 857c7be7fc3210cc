//! Single-producer, single-consumer event queue.
//!
//! The producer pushes from a background task; the consumer pulls lazily
//! through the stream returned by [`EventQueue::new`]. The stream ends once
//! the queue is closed and the backlog is drained.

use std::sync::{Mutex, PoisonError};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Producer half of the queue.
#[derive(Debug)]
pub struct EventQueue<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T: Send + 'static> EventQueue<T> {
    /// Create a queue and the stream that drains it.
    pub fn new() -> (Self, BoxStream<'static, T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            UnboundedReceiverStream::new(rx).boxed(),
        )
    }

    /// Append a value. A no-op once the queue is closed or the reader is gone.
    pub fn push(&self, value: T) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(value);
        }
    }

    /// Close the queue. Buffered values are still delivered.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_push_order_then_ends() {
        let (queue, stream) = EventQueue::new();
        queue.push(1);
        queue.push(2);
        queue.close();
        queue.push(3);

        let values: Vec<i32> = stream.collect().await;
        assert_eq!(values, vec![1, 2]);
        assert!(queue.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pull_resolves_on_push_and_close() {
        let (queue, mut stream) = EventQueue::new();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue.push("late");
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue.close();
        });

        assert_eq!(stream.next().await, Some("late"));
        assert_eq!(stream.next().await, None);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_reader_does_not_block_the_producer() {
        let (queue, stream) = EventQueue::new();
        drop(stream);
        queue.push(1);
        queue.close();
    }
}
