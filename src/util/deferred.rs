//! Single-assignment value with any number of awaiting observers.

use std::sync::Arc;

use tokio::sync::watch;

/// A value that is resolved at most once and may be awaited by many observers.
///
/// The first call to [`resolve`](Self::resolve) stores the value and wakes
/// every pending observer; later calls are ignored. Observers that arrive
/// after resolution get the stored value immediately. Clones share the same
/// slot.
#[derive(Debug)]
pub struct Deferred<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone + Send + Sync> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Deferred<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Store `value` if nothing was stored yet. Returns whether this call won.
    pub fn resolve(&self, value: T) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The stored value without waiting.
    pub fn peek(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Wait until resolved and return a copy of the value.
    pub async fn value(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // The sender is owned by `self`, so `changed` cannot observe a
            // closed channel while we are waiting.
            let _ = rx.changed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_resolution_wins() {
        let deferred = Deferred::new();
        assert!(deferred.resolve(1));
        assert!(!deferred.resolve(2));
        assert_eq!(deferred.value().await, 1);
        assert_eq!(deferred.peek(), Some(1));
    }

    #[tokio::test]
    async fn all_pending_observers_receive_the_value() {
        let deferred: Deferred<String> = Deferred::new();
        let observers: Vec<_> = (0..4)
            .map(|_| {
                let deferred = deferred.clone();
                tokio::spawn(async move { deferred.value().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!deferred.is_resolved());
        deferred.resolve("done".to_string());

        for observer in observers {
            assert_eq!(observer.await.unwrap(), "done");
        }
    }

    #[tokio::test]
    async fn late_observer_returns_immediately() {
        let deferred = Deferred::new();
        deferred.resolve(vec![1, 2, 3]);
        let value = tokio::time::timeout(Duration::from_millis(50), deferred.value())
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }
}
