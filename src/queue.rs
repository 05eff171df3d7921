//! Priority task queue (§4.4).
//!
//! A min-heap over [`DownloadTask::priority`] (ties unspecified, §9),
//! supporting a blocking pop with timeout so every worker has a
//! suspension point to observe cancellation and the backoff barrier
//! between dequeues (§5).

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::types::DownloadTask;

/// Thread-safe priority queue of pending downloads.
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<DownloadTask>>,
    notify: Notify,
    in_flight: AtomicUsize,
}

impl TaskQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Push a task; never blocks.
    pub fn push(&self, task: DownloadTask) {
        self.heap.lock().unwrap().push(task);
        self.notify.notify_one();
    }

    /// Pop the highest-priority task, waiting up to `timeout` if the queue
    /// is empty. Returns `None` on timeout, letting the caller re-check
    /// cancellation and backoff state (§4.6 step 2).
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<DownloadTask> {
        if let Some(task) = self.try_pop() {
            return Some(task);
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => self.try_pop(),
            _ = tokio::time::sleep(timeout) => None,
        }
    }

    fn try_pop(&self) -> Option<DownloadTask> {
        let mut heap = self.heap.lock().unwrap();
        let task = heap.pop();
        if task.is_some() {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }
        task
    }

    /// Acknowledge that a popped task's handling (success, failure, or
    /// requeue) has finished.
    pub fn task_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Current number of queued (not yet popped) tasks.
    pub fn depth(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    /// Number of tasks popped but not yet acknowledged via [`Self::task_done`].
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, priority: u8) -> DownloadTask {
        DownloadTask {
            item_id: "item".to_string(),
            file_name: name.to_string(),
            file_url: format!("https://archive.org/download/item/{name}"),
            size: 1,
            expected_md5: None,
            attempt_count: 0,
            priority,
        }
    }

    #[tokio::test]
    async fn pops_lowest_priority_first() {
        let queue = TaskQueue::new();
        queue.push(task("large.bin", DownloadTask::PRIORITY_LARGE));
        queue.push(task("readme.txt", DownloadTask::PRIORITY_METADATA));
        queue.push(task("normal.dat", DownloadTask::PRIORITY_NORMAL));

        let first = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.file_name, "readme.txt");
        let second = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.file_name, "normal.dat");
        let third = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(third.file_name, "large.bin");
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = TaskQueue::new();
        let result = queue.pop_timeout(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn depth_and_in_flight_accounting() {
        let queue = TaskQueue::new();
        queue.push(task("a", 50));
        queue.push(task("b", 50));
        assert_eq!(queue.depth(), 2);

        let _ = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.in_flight(), 1);

        queue.task_done();
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn push_wakes_a_blocked_pop() {
        let queue = std::sync::Arc::new(TaskQueue::new());
        let queue2 = queue.clone();
        let handle = tokio::spawn(async move { queue2.pop_timeout(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(task("late.dat", 50));
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pop should wake promptly on push")
            .unwrap();
        assert_eq!(result.unwrap().file_name, "late.dat");
    }
}
