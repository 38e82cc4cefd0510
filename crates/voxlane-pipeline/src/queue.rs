//! FIFO work queue with a completion barrier.
//!
//! Every `put` raises the pending count; it drops again when the consumer
//! releases the [`WorkItem`] it received, or when the item is drained
//! unprocessed. [`WorkQueue::join`] waits for the count to reach zero.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};

pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
    pending: watch::Sender<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            pending,
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, item: T) {
        self.pending.send_modify(|n| *n += 1);
        self.items().push_back(item);
        self.available.notify_one();
    }

    /// Wait for the next item. Cancel-safe: nothing is lost if the future
    /// is dropped before it resolves.
    pub async fn recv(&self) -> WorkItem<'_, T> {
        loop {
            let next = self.items().pop_front();
            if let Some(item) = next {
                return WorkItem { queue: self, item };
            }
            self.available.notified().await;
        }
    }

    /// Remove every queued item without processing it. Never blocks.
    pub fn drain(&self) -> usize {
        let drained = self.items().drain(..).count();
        if drained > 0 {
            self.pending.send_modify(|n| *n = n.saturating_sub(drained));
        }
        drained
    }

    /// Items put but not yet retired, including one in the consumer's hands.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Wait until every item put so far has been retired.
    pub async fn join(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn task_done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// An item taken from a [`WorkQueue`]. Dropping it marks the item done.
pub struct WorkItem<'a, T> {
    queue: &'a WorkQueue<T>,
    item: T,
}

impl<T> Deref for WorkItem<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> Drop for WorkItem<'_, T> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_fifo_and_barrier() {
        let queue = WorkQueue::new();
        queue.put("a");
        queue.put("b");
        assert_eq!(queue.pending(), 2);

        let first = queue.recv().await;
        assert_eq!(*first, "a");
        assert_eq!(queue.pending(), 2);
        drop(first);
        assert_eq!(queue.pending(), 1);

        assert_eq!(*queue.recv().await, "b");
        assert_eq!(queue.pending(), 0);
        queue.join().await;
    }

    #[tokio::test]
    async fn test_join_waits_for_in_flight_item() {
        let queue = Arc::new(WorkQueue::new());
        queue.put(1);

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let item = queue.recv().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                drop(item);
            })
        };

        tokio::time::timeout(Duration::from_secs(2), queue.join())
            .await
            .expect("join should complete once the item is released");
        assert_eq!(queue.pending(), 0);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_wakes_on_put() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let value = *queue.recv().await;
                value
            })
        };
        tokio::task::yield_now().await;
        queue.put(7);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drain_retires_queued_items() {
        let queue = WorkQueue::new();
        assert_eq!(queue.drain(), 0);

        queue.put("x");
        queue.put("y");
        queue.put("z");
        let held = queue.recv().await;
        assert_eq!(queue.drain(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.pending(), 1);

        drop(held);
        assert_eq!(queue.pending(), 0);
        queue.join().await;
    }

    #[tokio::test]
    async fn test_cancelled_recv_loses_nothing() {
        let queue = WorkQueue::<u8>::new();
        let attempt = tokio::time::timeout(Duration::from_millis(10), queue.recv()).await;
        assert!(attempt.is_err());

        queue.put(3);
        assert_eq!(*queue.recv().await, 3);
    }
}
