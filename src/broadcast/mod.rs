//! Fan-out of one producer sequence to many independent subscriptions.
//!
//! Each [`Subscription`] owns an unbounded queue, so a slow or abandoned
//! consumer never blocks the producer or any other consumer. Dropping a
//! subscription only removes its queue.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::RociError;

enum Envelope<T> {
    Item(T),
    Failed(RociError),
}

#[derive(Clone)]
enum Terminal {
    Finished,
    Failed(RociError),
}

struct Registry<T> {
    subscribers: Vec<mpsc::UnboundedSender<Envelope<T>>>,
    terminal: Option<Terminal>,
}

/// Replicates values to every registered [`Subscription`] in send order.
pub struct Broadcaster<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                subscribers: Vec::new(),
                terminal: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new subscription.
    ///
    /// A subscription registered after [`finish`](Self::finish) or
    /// [`fail`](Self::fail) replays the same terminal outcome immediately.
    pub fn register(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        match registry.terminal.clone() {
            None => registry.subscribers.push(tx),
            Some(Terminal::Finished) => drop(tx),
            Some(Terminal::Failed(error)) => {
                let _ = tx.send(Envelope::Failed(error));
            }
        }
        Subscription::new(rx)
    }

    /// Deliver `value` to every live subscription.
    ///
    /// Subscriptions whose consumer has gone away are pruned. Values sent after
    /// the broadcaster finished are discarded.
    pub fn send(&self, value: T) {
        let mut registry = self.lock();
        if registry.terminal.is_some() {
            return;
        }
        registry
            .subscribers
            .retain(|tx| tx.send(Envelope::Item(value.clone())).is_ok());
    }

    /// Complete every subscription cleanly.
    pub fn finish(&self) {
        self.close(Terminal::Finished);
    }

    /// Complete every subscription with `error`.
    pub fn fail(&self, error: RociError) {
        self.close(Terminal::Failed(error));
    }

    fn close(&self, terminal: Terminal) {
        let mut registry = self.lock();
        if registry.terminal.is_some() {
            return;
        }
        let subscribers = std::mem::take(&mut registry.subscribers);
        if let Terminal::Failed(error) = &terminal {
            for tx in &subscribers {
                let _ = tx.send(Envelope::Failed(error.clone()));
            }
        }
        registry.terminal = Some(terminal);
    }

    pub fn is_finished(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Number of subscriptions still attached.
    pub fn subscriber_count(&self) -> usize {
        let mut registry = self.lock();
        registry.subscribers.retain(|tx| !tx.is_closed());
        registry.subscribers.len()
    }
}

/// One consumer's view of a [`Broadcaster`].
///
/// Yields `Ok` values in send order, then either ends or yields a single
/// `Err` and ends.
pub struct Subscription<T> {
    inner: UnboundedReceiverStream<Envelope<T>>,
    done: bool,
}

impl<T> Subscription<T> {
    fn new(rx: mpsc::UnboundedReceiver<Envelope<T>>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
            done: false,
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, RociError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
            Some(Envelope::Item(value)) => Poll::Ready(Some(Ok(value))),
            Some(Envelope::Failed(error)) => {
                self.done = true;
                Poll::Ready(Some(Err(error)))
            }
            None => {
                self.done = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn each_subscription_sees_every_value_in_order() {
        let broadcaster = Broadcaster::new();
        let first = broadcaster.register();
        let second = broadcaster.register();

        for i in 0..3 {
            broadcaster.send(i);
        }
        broadcaster.finish();

        let a: Vec<_> = first.map(|v| v.unwrap()).collect().await;
        let b: Vec<_> = second.map(|v| v.unwrap()).collect().await;
        assert_eq!(a, vec![0, 1, 2]);
        assert_eq!(b, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn late_registration_replays_terminal_error() {
        let broadcaster: Broadcaster<u8> = Broadcaster::new();
        broadcaster.fail(RociError::Stream("boom".into()));

        let mut late = broadcaster.register();
        assert_eq!(late.next().await, Some(Err(RociError::Stream("boom".into()))));
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn late_registration_after_clean_finish_ends_immediately() {
        let broadcaster: Broadcaster<u8> = Broadcaster::new();
        broadcaster.send(1);
        broadcaster.finish();
        let mut late = broadcaster.register();
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned_without_affecting_others() {
        let broadcaster = Broadcaster::new();
        let dropped = broadcaster.register();
        let mut kept = broadcaster.register();
        drop(dropped);

        broadcaster.send("a");
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(kept.next().await, Some(Ok("a")));
    }

    #[tokio::test]
    async fn values_after_finish_are_discarded() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.register();
        broadcaster.send(1);
        broadcaster.finish();
        broadcaster.send(2);
        broadcaster.fail(RociError::Cancelled);

        let values: Vec<_> = sub.collect().await;
        assert_eq!(values, vec![Ok(1)]);
    }
}
