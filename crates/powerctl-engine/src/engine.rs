//! The Engine/Runner: a worker pool draining a bounded task queue,
//! each task running executor -> verifier -> state-updater with retry and a
//! per-BMC concurrency limit, aggregating per-transition progress so the
//! transition's own terminal state is computed exactly once, when its last
//! task drains.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use powerctl_config::EngineSettings;
use powerctl_db::Store;
use powerctl_types::{
    MissingMapping, NodePowerMapping, Operation, Task, TaskPhase, Transition, TransitionPhase,
};

use crate::error::EngineError;
use crate::executor::{Executor, TaskExecutionContext};
use crate::limiter::{BmcLimiter, Slot};
use crate::progress::{TaskOutcomeKind, TransitionProgress};
use crate::queue::{Dequeued, QueueItem, TaskQueue};
use crate::retry::compute_backoff;
use crate::state_updater::StateUpdater;
use crate::verifier::{verify, PowerStateReader, VerifyError};

pub struct StartTransitionRequest {
    pub request_id: Option<String>,
    pub operation: Operation,
    pub node_ids: Vec<String>,
    pub requested_by: String,
    pub dry_run: bool,
}

enum TaskOutcome {
    Success { power_state: String, attempt_count: u32 },
    Failure { detail: String, attempt_count: u32 },
    Canceled,
}

pub struct Engine {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    reader: Arc<dyn PowerStateReader>,
    updater: Arc<dyn StateUpdater>,
    settings: EngineSettings,
    queue: Arc<TaskQueue>,
    limiter: Arc<BmcLimiter>,
    progress: Mutex<HashMap<Uuid, TransitionProgress>>,
    cancels: Mutex<HashMap<Uuid, CancellationToken>>,
    started: AtomicBool,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
        reader: Arc<dyn PowerStateReader>,
        updater: Arc<dyn StateUpdater>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            executor,
            reader,
            updater,
            queue: Arc::new(TaskQueue::new(settings.queue_size)),
            limiter: Arc::new(BmcLimiter::new(settings.per_bmc_concurrency)),
            progress: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            settings,
        })
    }

    /// Spawns the worker pool and a shutdown watcher. Idempotent: a second
    /// call is a no-op.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.settings.global_concurrency.max(1) {
            let engine = Arc::clone(self);
            let worker_cancel = cancel.clone();
            tokio::spawn(async move { engine.worker_loop(worker_cancel).await });
        }
        let queue = Arc::clone(&self.queue);
        let shutdown_cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_cancel.cancelled().await;
            queue.close().await;
        });
    }

    async fn worker_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            match self.queue.dequeue(&cancel).await {
                Dequeued::Item(item) => self.clone().execute_task(item.transition_id, item.task).await,
                Dequeued::Closed => return,
            }
        }
    }

    /// Resolves node mappings, persists the transition and its tasks, and
    /// (unless dry-run or every mapping is missing) enqueues the runnable
    /// tasks for the worker pool.
    pub async fn start_transition(
        &self,
        caller_cancel: &CancellationToken,
        req: StartTransitionRequest,
    ) -> Result<Transition, EngineError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::NotStarted);
        }

        let node_ids = normalize_node_ids(req.node_ids)?;
        if node_ids.len() > self.settings.bulk_max_nodes {
            return Err(EngineError::Validation(format!(
                "too many target nodes: {} exceeds the limit of {}",
                node_ids.len(),
                self.settings.bulk_max_nodes
            )));
        }

        let resolved = self.store.resolve_node_mappings(&node_ids).await?;
        let now = Utc::now();
        let executable_total = resolved.resolved.len();
        let missing_count = resolved.missing.len() as i64;

        let transition_state = if req.dry_run {
            TransitionPhase::Planned
        } else if executable_total == 0 {
            TransitionPhase::Failed
        } else {
            TransitionPhase::Pending
        };

        let transition = Transition {
            id: Uuid::nil(),
            request_id: req.request_id,
            operation: req.operation,
            state: transition_state,
            requested_by: req.requested_by,
            dry_run: req.dry_run,
            target_count: node_ids.len() as i64,
            success_count: 0,
            failure_count: if transition_state.is_terminal() { missing_count } else { 0 },
            queued_at: now,
            started_at: None,
            completed_at: if transition_state.is_terminal() { Some(now) } else { None },
            created_at: now,
            updated_at: now,
        };

        let mut tasks = Vec::with_capacity(node_ids.len());
        for m in &resolved.resolved {
            tasks.push(build_runnable_task(m, req.operation, req.dry_run, now));
        }
        for miss in &resolved.missing {
            tasks.push(build_mapping_failed_task(miss, req.operation, req.dry_run, now));
        }

        let (created_transition, created_tasks) = self.store.create_transition(transition, tasks).await?;

        if !req.dry_run && created_transition.state == TransitionPhase::Pending {
            let transition_cancel = CancellationToken::new();
            self.cancels.lock().await.insert(created_transition.id, transition_cancel);
            self.progress.lock().await.insert(
                created_transition.id,
                TransitionProgress::new(created_transition.clone(), executable_total),
            );
            for task in created_tasks.into_iter().filter(|t| t.state == TaskPhase::Pending) {
                let item = QueueItem { transition_id: created_transition.id, task };
                if self.queue.enqueue(item, caller_cancel).await.is_err() {
                    warn!(transition_id = %created_transition.id, "failed to enqueue task: queue closed or caller canceled");
                }
            }
        }

        Ok(created_transition)
    }

    /// Cancels every not-yet-terminal task of `id`. Idempotent: aborting an
    /// already-terminal or already-aborted transition is a no-op, not an
    /// error.
    pub async fn abort_transition(&self, id: Uuid) -> Result<(), EngineError> {
        let cancel = { self.cancels.lock().await.get(&id).cloned() };
        if let Some(token) = cancel {
            token.cancel();
            return Ok(());
        }
        // No tracked cancellation: either unknown, or already terminal.
        self.store.get_transition(id).await?;
        Ok(())
    }

    pub async fn get_transition(&self, id: Uuid) -> Result<Transition, EngineError> {
        Ok(self.store.get_transition(id).await?)
    }

    pub async fn list_transitions(&self, limit: i64, offset: i64) -> Result<Vec<Transition>, EngineError> {
        Ok(self.store.list_transitions(limit, offset).await?)
    }

    pub async fn list_transition_tasks(&self, id: Uuid) -> Result<Vec<Task>, EngineError> {
        Ok(self.store.list_transition_tasks(id).await?)
    }

    pub async fn list_latest_tasks_by_node(&self, node_ids: &[String]) -> Result<Vec<Task>, EngineError> {
        Ok(self.store.list_latest_transition_tasks_by_node(node_ids).await?)
    }

    async fn execute_task(self: Arc<Self>, transition_id: Uuid, mut task: Task) {
        let transition_cancel = { self.cancels.lock().await.get(&transition_id).cloned() };
        let Some(transition_cancel) = transition_cancel else {
            warn!(transition_id = %transition_id, task_id = %task.id, "dequeued task for untracked transition");
            return;
        };

        // Dequeue-time cancellation check: a task that never started running
        // still observes an abort issued while it sat in the queue.
        if transition_cancel.is_cancelled() {
            self.finish_task(transition_id, task, TaskOutcome::Canceled).await;
            return;
        }

        task.state = TaskPhase::Running;
        task.started_at = Some(Utc::now());
        if let Err(e) = self.store.update_transition_task(task.clone()).await {
            warn!(task_id = %task.id, error = %e, "failed to persist task running state");
        }
        self.note_transition_started(transition_id).await;

        let per_task_cancel = transition_cancel.child_token();
        let outcome = tokio::select! {
            _ = per_task_cancel.cancelled() => TaskOutcome::Canceled,
            res = tokio::time::timeout(self.settings.transition_deadline, self.run_pipeline(transition_id, &task, &per_task_cancel)) => {
                res.unwrap_or(TaskOutcome::Canceled)
            }
        };

        self.finish_task(transition_id, task, outcome).await;
    }

    async fn run_pipeline(&self, transition_id: Uuid, task: &Task, cancel: &CancellationToken) -> TaskOutcome {
        let slot = self.limiter.acquire(&task.bmc_id, cancel).await;
        let _slot = match slot {
            Slot::Canceled => return TaskOutcome::Canceled,
            other => other,
        };

        let ctx = TaskExecutionContext {
            transition_id,
            task_id: task.id,
            node_id: task.node_id.clone(),
            bmc_id: task.bmc_id.clone(),
            endpoint: task.bmc_endpoint.clone(),
            credential_id: task.credential_id.clone(),
            insecure_skip_verify: task.insecure_skip_verify,
            operation: task.operation,
        };

        let (system_path, attempt_count) = match self.execute_with_retry(&ctx, cancel).await {
            Ok(v) => v,
            Err(TaskOutcome::Canceled) => return TaskOutcome::Canceled,
            Err(other) => return other,
        };

        let Some(expected) = ctx.operation.expected_power_state() else {
            return TaskOutcome::Failure {
                detail: format!("operation {:?} has no verifiable terminal power state", ctx.operation),
                attempt_count,
            };
        };

        match verify(
            self.reader.as_ref(),
            &ctx,
            &system_path,
            expected,
            self.settings.verification_poll,
            self.settings.verification_window,
            cancel,
        )
        .await
        {
            Ok(outcome) => match self.updater.patch(&ctx.node_id, &outcome.observed).await {
                Ok(()) => TaskOutcome::Success { power_state: outcome.observed, attempt_count },
                Err(e) => TaskOutcome::Failure {
                    detail: format!("updating inventory state: {e}"),
                    attempt_count,
                },
            },
            Err(VerifyError::Canceled) => TaskOutcome::Canceled,
            Err(e) => TaskOutcome::Failure { detail: e.to_string(), attempt_count },
        }
    }

    async fn execute_with_retry(
        &self,
        ctx: &TaskExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(String, u32), TaskOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.executor.execute(ctx).await {
                Ok(path) => return Ok((path, attempt)),
                Err(crate::executor::ExecutorError::Terminal(detail)) => {
                    return Err(TaskOutcome::Failure { detail, attempt_count: attempt });
                }
                Err(crate::executor::ExecutorError::Retryable(detail)) => {
                    if attempt >= self.settings.retry_attempts {
                        return Err(TaskOutcome::Failure { detail, attempt_count: attempt });
                    }
                    let delay = compute_backoff(attempt, self.settings.retry_backoff_base, self.settings.retry_backoff_max);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TaskOutcome::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn finish_task(&self, transition_id: Uuid, mut task: Task, outcome: TaskOutcome) {
        let kind = match outcome {
            TaskOutcome::Success { power_state, attempt_count } => {
                task.state = TaskPhase::Succeeded;
                task.final_power_state = Some(power_state);
                task.attempt_count = attempt_count as i64;
                TaskOutcomeKind::Success
            }
            TaskOutcome::Failure { detail, attempt_count } => {
                task.state = TaskPhase::Failed;
                task.error_detail = Some(detail);
                task.attempt_count = attempt_count as i64;
                TaskOutcomeKind::Failure
            }
            TaskOutcome::Canceled => {
                task.state = TaskPhase::Canceled;
                TaskOutcomeKind::Canceled
            }
        };
        task.completed_at = Some(Utc::now());

        if let Err(e) = self.store.update_transition_task(task.clone()).await {
            warn!(task_id = %task.id, error = %e, "failed to persist terminal task state");
        }
        self.record_task_terminal(transition_id, kind).await;
    }

    async fn note_transition_started(&self, transition_id: Uuid) {
        let snapshot = {
            let mut progress_map = self.progress.lock().await;
            match progress_map.get_mut(&transition_id) {
                Some(p) if !p.started => {
                    p.started = true;
                    p.transition.state = TransitionPhase::Running;
                    p.transition.started_at = Some(Utc::now());
                    Some(p.transition.clone())
                }
                _ => None,
            }
        };
        if let Some(t) = snapshot {
            if let Err(e) = self.store.update_transition(t).await {
                warn!(transition_id = %transition_id, error = %e, "failed to persist transition running state");
            }
        }
    }

    async fn record_task_terminal(&self, transition_id: Uuid, kind: TaskOutcomeKind) {
        let drained = {
            let mut progress_map = self.progress.lock().await;
            let drained = match progress_map.get_mut(&transition_id) {
                Some(p) => {
                    p.record_terminal(kind);
                    if p.is_drained() {
                        Some((p.final_state(), p.success_count, p.failure_count, p.transition.clone()))
                    } else {
                        None
                    }
                }
                None => None,
            };
            if drained.is_some() {
                progress_map.remove(&transition_id);
            }
            drained
        };

        if let Some((final_state, success_count, failure_count, mut transition)) = drained {
            transition.state = final_state;
            transition.success_count = success_count;
            transition.failure_count = failure_count;
            transition.completed_at = Some(Utc::now());
            if let Err(e) = self.store.update_transition(transition).await {
                warn!(transition_id = %transition_id, error = %e, "failed to persist terminal transition state");
            }
            self.cancels.lock().await.remove(&transition_id);
        }
    }
}

fn normalize_node_ids(raw: Vec<String>) -> Result<Vec<String>, EngineError> {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for n in raw {
        let trimmed = n.trim().to_string();
        if !trimmed.is_empty() {
            set.insert(trimmed);
        }
    }
    if set.is_empty() {
        return Err(EngineError::Validation("node_ids must not be empty".to_string()));
    }
    Ok(set.into_iter().collect())
}

fn build_runnable_task(m: &NodePowerMapping, operation: Operation, dry_run: bool, now: chrono::DateTime<Utc>) -> Task {
    Task {
        id: Uuid::nil(),
        transition_id: Uuid::nil(),
        node_id: m.node_id.clone(),
        bmc_id: m.bmc_id.clone(),
        bmc_endpoint: m.endpoint.clone(),
        credential_id: m.credential_id.clone(),
        insecure_skip_verify: m.insecure_skip_verify,
        operation,
        state: if dry_run { TaskPhase::Planned } else { TaskPhase::Pending },
        dry_run,
        attempt_count: 0,
        final_power_state: None,
        error_detail: None,
        queued_at: now,
        started_at: None,
        completed_at: if dry_run { Some(now) } else { None },
        created_at: now,
        updated_at: now,
    }
}

fn build_mapping_failed_task(
    miss: &MissingMapping,
    operation: Operation,
    dry_run: bool,
    now: chrono::DateTime<Utc>,
) -> Task {
    Task {
        id: Uuid::nil(),
        transition_id: Uuid::nil(),
        node_id: miss.node_id.clone(),
        bmc_id: String::new(),
        bmc_endpoint: String::new(),
        credential_id: String::new(),
        insecure_skip_verify: false,
        operation,
        state: TaskPhase::Failed,
        dry_run,
        attempt_count: 0,
        final_power_state: None,
        error_detail: Some(miss.detail.clone()),
        queued_at: now,
        started_at: None,
        completed_at: Some(now),
        created_at: now,
        updated_at: now,
    }
}
