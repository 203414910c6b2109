//! Bounded task queue: a thin wrapper over `tokio::sync::mpsc` that
//! makes `close()` idempotent and lets callers race enqueue/dequeue against
//! a cancellation token instead of blocking forever.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use powerctl_types::Task;

pub struct QueueItem {
    pub transition_id: Uuid,
    pub task: Task,
}

pub struct QueueClosed;

pub enum Dequeued {
    Item(QueueItem),
    Closed,
}

pub struct TaskQueue {
    tx: Mutex<Option<mpsc::Sender<QueueItem>>>,
    rx: Mutex<mpsc::Receiver<QueueItem>>,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Blocks until capacity is available, the queue is closed, or `cancel`
    /// fires.
    pub async fn enqueue(&self, item: QueueItem, cancel: &CancellationToken) -> Result<(), QueueClosed> {
        let tx = { self.tx.lock().await.clone() };
        let Some(tx) = tx else {
            return Err(QueueClosed);
        };
        tokio::select! {
            res = tx.send(item) => res.map_err(|_| QueueClosed),
            _ = cancel.cancelled() => Err(QueueClosed),
        }
    }

    /// Blocks until an item is available, the queue drains closed, or
    /// `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Dequeued {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => Dequeued::Item(item),
                None => Dequeued::Closed,
            },
            _ = cancel.cancelled() => Dequeued::Closed,
        }
    }

    /// Drops the sender half so every blocked and future `dequeue` observes
    /// `Closed` once the channel drains. Safe to call more than once.
    pub async fn close(&self) {
        let mut guard = self.tx.lock().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use powerctl_types::{Operation, TaskPhase};

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            transition_id: Uuid::new_v4(),
            node_id: "node-1".into(),
            bmc_id: "bmc-1".into(),
            bmc_endpoint: "https://bmc-1".into(),
            credential_id: "".into(),
            insecure_skip_verify: false,
            operation: Operation::On,
            state: TaskPhase::Pending,
            dry_run: false,
            attempt_count: 0,
            final_power_state: None,
            error_detail: None,
            queued_at: now,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let queue = TaskQueue::new(4);
        let cancel = CancellationToken::new();
        let task = sample_task();
        let transition_id = task.transition_id;
        queue
            .enqueue(QueueItem { transition_id, task }, &cancel)
            .await
            .ok()
            .unwrap();
        match queue.dequeue(&cancel).await {
            Dequeued::Item(item) => assert_eq!(item.transition_id, transition_id),
            Dequeued::Closed => panic!("expected an item"),
        }
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let queue = TaskQueue::new(4);
        let cancel = CancellationToken::new();
        queue.close().await;
        queue.close().await; // idempotent
        match queue.dequeue(&cancel).await {
            Dequeued::Closed => {}
            Dequeued::Item(_) => panic!("expected closed"),
        }
    }

    #[tokio::test]
    async fn cancel_unblocks_dequeue() {
        let queue = TaskQueue::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        match queue.dequeue(&cancel).await {
            Dequeued::Closed => {}
            Dequeued::Item(_) => panic!("expected closed on cancellation"),
        }
    }
}
