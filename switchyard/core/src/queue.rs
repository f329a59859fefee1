//! Priority Task Queue
//!
//! Holding area for submitted work. Items are ordered strictly by priority
//! (highest first) and by submission sequence within a priority class.
//!
//! `pop` suspends until an item is available; each item is handed to exactly
//! one caller no matter how many dispatch loops are waiting.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::task::{Priority, TaskId};

/// An entry in the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueuedTask {
    /// Task to dispatch
    pub task_id: TaskId,

    /// Priority it was queued at
    pub priority: Priority,

    /// Submission sequence, lower is older
    pub seq: u64,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

/// Priority queue of task ids
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task, returning the assigned sequence number
    pub fn push(&self, task_id: TaskId, priority: Priority) -> u64 {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueuedTask {
                task_id,
                priority,
                seq,
            });
            seq
        };
        self.notify.notify_one();
        seq
    }

    /// Dequeue the head item without waiting
    pub fn try_pop(&self) -> Option<QueuedTask> {
        self.inner.lock().heap.pop()
    }

    /// Dequeue the head item, waiting until one exists
    pub async fn pop(&self) -> QueuedTask {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent push is not missed
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_priority_then_fifo() {
        let queue = TaskQueue::new();
        let low = TaskId::generate();
        let med_a = TaskId::generate();
        let med_b = TaskId::generate();
        let crit = TaskId::generate();

        queue.push(low, Priority::Low);
        queue.push(med_a, Priority::Medium);
        queue.push(crit, Priority::Critical);
        queue.push(med_b, Priority::Medium);

        let order: Vec<TaskId> = std::iter::from_fn(|| queue.try_pop())
            .map(|q| q.task_id)
            .collect();
        assert_eq!(order, vec![crit, med_a, med_b, low]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeued_item_goes_behind_its_class() {
        let queue = TaskQueue::new();
        let first = TaskId::generate();
        let second = TaskId::generate();

        queue.push(first, Priority::High);
        queue.push(second, Priority::High);

        let head = queue.try_pop().unwrap();
        assert_eq!(head.task_id, first);
        queue.push(head.task_id, head.priority);

        assert_eq!(queue.try_pop().unwrap().task_id, second);
        assert_eq!(queue.try_pop().unwrap().task_id, first);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(TaskQueue::new());
        let id = TaskId::generate();

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        queue.push(id, Priority::Low);
        let item = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.task_id, id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pop_delivers_once() {
        let queue = Arc::new(TaskQueue::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = vec![];
                for _ in 0..25 {
                    seen.push(q.pop().await.task_id);
                }
                seen
            }));
        }

        for i in 0..200 {
            let priority = if i % 2 == 0 { Priority::High } else { Priority::Low };
            queue.push(TaskId::generate(), priority);
        }

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all.insert(id), "task delivered twice");
            }
        }
        assert_eq!(all.len(), 200);
        assert!(queue.is_empty());
    }
}
