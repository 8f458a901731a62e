//! Timeout wrapper for WebSocket streams.
//!
//! Monitors idle time and ends the stream if nothing is received for the configured period.
//! This catches silent disconnections, including a peer that stops answering keepalive
//! pings, which never surface as an explicit error.

use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// A stream wrapper that terminates the stream if no item is received for the configured
/// timeout period. Termination triggers the reconnect logic of the owning
/// [`StreamConnection`](super::connection::StreamConnection).
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
        }
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "WebSocket read timeout - no data received, triggering reconnection"
                    );

                    // Avoid immediately timing out again if polled after termination
                    self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_resets_deadline_on_items() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut stream = TimeoutStream::new(UnboundedReceiverStream::new(rx), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        tx.send(1).unwrap();
        assert_eq!(stream.next().await, Some(1));

        // Deadline was reset by the item, 9 more seconds is still within the timeout
        tokio::time::advance(Duration::from_secs(9)).await;
        let mut next = task::spawn(stream.next());
        assert_pending!(next.poll());
        drop(next);

        tx.send(2).unwrap();
        assert_eq!(stream.next().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_ends_when_idle() {
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut stream = TimeoutStream::new(UnboundedReceiverStream::new(rx), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;
        let mut next = task::spawn(stream.next());
        assert_ready_eq!(next.poll(), None);
    }

    #[tokio::test]
    async fn test_timeout_stream_passes_through_end_of_stream() {
        let mut stream = TimeoutStream::new(futures::stream::iter([1, 2]), Duration::from_secs(10));
        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, None);
    }
}
