//! The operation queue shared between the change source and the
//! dispatch loop.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::event::ChangeRecord;

/// Unbounded FIFO of change records plus a wake signal.
///
/// The producer side (the reader thread, or the portable backend's
/// callback) appends records and signals once per delivered batch; the
/// consumer side drains from the front. Enqueue order is exactly the
/// order the OS reported the underlying notifications, and the queue
/// never drops records: a slow consumer accumulates a backlog instead
/// of losing events.
#[derive(Debug, Default)]
pub struct OperationQueue {
    records: Mutex<VecDeque<ChangeRecord>>,
    wake: Notify,
}

impl OperationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to the back of the queue.
    pub fn enqueue(&self, record: ChangeRecord) {
        self.lock().push_back(record);
    }

    /// Remove and return the oldest record, if any.
    pub fn try_dequeue(&self) -> Option<ChangeRecord> {
        self.lock().pop_front()
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything still queued. Called on session teardown.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Wake the consumer.
    ///
    /// At most one wake is held pending, which is all the drain loop
    /// needs: a signal raised while the consumer is mid-drain stays set,
    /// so a batch that lands between "drained empty" and "back to
    /// waiting" is never missed.
    pub fn signal(&self) {
        self.wake.notify_one();
    }

    /// Wait until signaled or until `timeout` elapses; returns whether
    /// the signal was observed. A successful wait consumes the signal.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wake.notified())
            .await
            .is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ChangeRecord>> {
        // The sections holding this lock never panic, but a poisoned
        // queue would still be structurally intact.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeAction;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn record(name: &str) -> ChangeRecord {
        ChangeRecord::new(ChangeAction::Added, format!("/watched/{name}"))
    }

    #[test]
    fn test_fifo_order() {
        let queue = OperationQueue::new();
        queue.enqueue(record("a"));
        queue.enqueue(record("b"));
        queue.enqueue(record("c"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue(), Some(record("a")));
        assert_eq!(queue.try_dequeue(), Some(record("b")));
        assert_eq!(queue.try_dequeue(), Some(record("c")));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_clear_empties_queue() {
        let queue = OperationQueue::new();
        queue.enqueue(record("a"));
        queue.enqueue(record("b"));

        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_wait_times_out_when_idle() {
        let queue = OperationQueue::new();
        assert!(!queue.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let queue = OperationQueue::new();
        queue.signal();
        assert!(queue.wait(Duration::from_millis(20)).await);
        // The signal auto-resets once observed.
        assert!(!queue.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_signal_raised_mid_drain_is_still_observed() {
        let queue = OperationQueue::new();
        queue.enqueue(record("a"));
        queue.signal();

        assert!(queue.wait(Duration::from_millis(20)).await);
        assert_eq!(queue.try_dequeue(), Some(record("a")));

        // A producer racing the end of the drain re-sets the signal.
        queue.enqueue(record("b"));
        queue.signal();
        assert!(queue.wait(Duration::from_millis(20)).await);
        assert_eq!(queue.try_dequeue(), Some(record("b")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_enqueue_is_fully_drained() {
        let queue = Arc::new(OperationQueue::new());
        let producer_queue = Arc::clone(&queue);

        let producer = std::thread::spawn(move || {
            for i in 0..100 {
                producer_queue.enqueue(record(&format!("item-{i}")));
                producer_queue.signal();
            }
        });

        let mut drained = Vec::new();
        while drained.len() < 100 {
            if queue.wait(Duration::from_millis(200)).await {
                while let Some(r) = queue.try_dequeue() {
                    drained.push(r);
                }
            }
        }
        producer.join().unwrap();

        let expected: Vec<ChangeRecord> =
            (0..100).map(|i| record(&format!("item-{i}"))).collect();
        assert_eq!(drained, expected);
    }
}
