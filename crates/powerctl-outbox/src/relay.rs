//! The Outbox Relay: polls the store's outbox table and publishes
//! unsent rows to the message bus with at-least-once semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use powerctl_db::Store;

use crate::publisher::EventPublisher;

const CLAIM_BATCH_SIZE: i64 = 100;

struct RowBackoff {
    next_attempt_at: Instant,
    current_delay: Duration,
}

/// Polls `store.outbox_claim_batch` at `poll_interval`, publishing each
/// claimed row via `publisher` and marking it sent on success. A row whose
/// publish fails is skipped for the rest of that poll (so one stuck row
/// never blocks the others) and is retried on a later poll no sooner than
/// its own exponential backoff, bounded by `retry_max`.
pub struct Relay {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    poll_interval: Duration,
    retry_initial: Duration,
    retry_max: Duration,
    dispatcher_id: String,
    backoffs: tokio::sync::Mutex<HashMap<String, RowBackoff>>,
}

impl Relay {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        poll_interval: Duration,
        retry_initial: Duration,
        retry_max: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            publisher,
            poll_interval,
            retry_initial,
            retry_max,
            dispatcher_id: format!("relay-{}", Uuid::new_v4()),
            backoffs: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Runs the poll loop until `cancel` fires. Intended to be spawned once
    /// by the daemon's process-level context, alongside the engine and the
    /// topology syncer.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("outbox relay shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One poll cycle: claim a batch, publish each row in order, mark sent
    /// on success. Exposed standalone so callers (the CLI, tests) can drive
    /// a single cycle without spawning the loop.
    pub async fn poll_once(&self) -> usize {
        let claimed = match self.store.outbox_claim_batch(CLAIM_BATCH_SIZE, &self.dispatcher_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "outbox relay failed to claim batch");
                return 0;
            }
        };

        let mut sent = 0usize;
        let now = Instant::now();
        for event in claimed {
            {
                let backoffs = self.backoffs.lock().await;
                if let Some(b) = backoffs.get(&event.id) {
                    if b.next_attempt_at > now {
                        continue;
                    }
                }
            }

            match self.publisher.publish(&event).await {
                Ok(()) => {
                    if let Err(e) = self.store.outbox_mark_sent(&event.id).await {
                        warn!(event_id = %event.id, error = %e, "failed to mark outbox event sent");
                    } else {
                        self.backoffs.lock().await.remove(&event.id);
                        sent += 1;
                    }
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "outbox event publish failed; will retry");
                    self.bump_backoff(&event.id).await;
                }
            }
        }
        sent
    }

    async fn bump_backoff(&self, event_id: &str) {
        let mut backoffs = self.backoffs.lock().await;
        let delay = match backoffs.get(event_id) {
            Some(b) => (b.current_delay * 2).min(self.retry_max),
            None => self.retry_initial,
        };
        backoffs.insert(
            event_id.to_string(),
            RowBackoff { next_attempt_at: Instant::now() + delay, current_delay: delay },
        );
    }
}
