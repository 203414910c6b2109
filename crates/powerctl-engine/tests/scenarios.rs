//! End-to-end scenarios against an in-memory store and fake capability
//! implementations: happy path, retry-then-success, verification timeout,
//! per-BMC serialization, dry run, and abort.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use powerctl_config::EngineSettings;
use powerctl_db::{InMemoryStore, Store};
use powerctl_engine::{
    Engine, ExecutorError, PowerStateReader, StartTransitionRequest, StateUpdater, TaskExecutionContext,
};
use powerctl_types::{BMCEndpoint, NodeBMCLink, Operation, Task, TaskPhase, Transition, TransitionPhase};

/// `replace_topology_mappings` reconciles its whole desired set per call
/// (anything not included is deleted), so a multi-node test setup must pass
/// every endpoint and link together in one call.
async fn map_nodes(store: &InMemoryStore, mappings: &[(&str, &str, &str)]) {
    let now = Utc::now();
    let mut endpoints_by_bmc: HashMap<String, BMCEndpoint> = HashMap::new();
    let mut links = Vec::new();
    for (node_id, bmc_id, endpoint) in mappings {
        endpoints_by_bmc.entry(bmc_id.to_string()).or_insert_with(|| BMCEndpoint {
            bmc_id: bmc_id.to_string(),
            endpoint: endpoint.to_string(),
            credential_id: "cred-1".to_string(),
            insecure_skip_verify: false,
            source: "test".to_string(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        });
        links.push(NodeBMCLink {
            node_id: node_id.to_string(),
            bmc_id: bmc_id.to_string(),
            source: "test".to_string(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        });
    }
    store
        .replace_topology_mappings(endpoints_by_bmc.into_values().collect(), links, now)
        .await
        .unwrap();
}

async fn wait_terminal(engine: &Arc<Engine>, id: Uuid) -> Transition {
    for _ in 0..200 {
        let t = engine.get_transition(id).await.unwrap();
        if t.state.is_terminal() {
            return t;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transition {id} never reached a terminal state");
}

struct ScriptedExecutor {
    // keyed by node_id: queue of results, consumed in order
    scripts: Mutex<HashMap<String, Vec<Result<String, ExecutorError>>>>,
}

#[async_trait]
impl powerctl_engine::Executor for ScriptedExecutor {
    async fn execute(&self, ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        let mut scripts = self.scripts.lock().await;
        let entry = scripts.get_mut(&ctx.node_id).expect("scripted node");
        if entry.is_empty() {
            panic!("executor script exhausted for {}", ctx.node_id);
        }
        entry.remove(0)
    }
}

struct ScriptedReader {
    // keyed by node_id: the power state to report
    states: HashMap<String, String>,
}

#[async_trait]
impl PowerStateReader for ScriptedReader {
    async fn read(&self, ctx: &TaskExecutionContext, _system_path: &str) -> Result<String, String> {
        Ok(self.states.get(&ctx.node_id).cloned().unwrap_or_else(|| "Off".to_string()))
    }
}

struct RecordingUpdater {
    patched: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl StateUpdater for RecordingUpdater {
    async fn patch(&self, node_id: &str, power_state: &str) -> Result<(), String> {
        self.patched.lock().await.push((node_id.to_string(), power_state.to_string()));
        Ok(())
    }
}

fn base_settings() -> EngineSettings {
    let mut s = EngineSettings {
        retry_attempts: 4,
        retry_backoff_base: Duration::from_millis(1),
        retry_backoff_max: Duration::from_millis(1),
        transition_deadline: Duration::from_secs(5),
        verification_window: Duration::from_millis(200),
        verification_poll: Duration::from_millis(5),
        ..Default::default()
    };
    s.normalize();
    s
}

#[tokio::test]
async fn happy_path_completes_with_verification() {
    let store = Arc::new(InMemoryStore::new("powerctl-test"));
    map_nodes(&store, &[("node-1", "bmc-1", "https://bmc-1")]).await;

    let executor = Arc::new(ScriptedExecutor {
        scripts: Mutex::new(HashMap::from([("node-1".to_string(), vec![Ok("/redfish/v1/Systems/node-1".to_string())])])),
    });
    let reader = Arc::new(ScriptedReader { states: HashMap::from([("node-1".to_string(), "On".to_string())]) });
    let updater = Arc::new(RecordingUpdater { patched: Mutex::new(Vec::new()) });

    let engine = Engine::new(store.clone() as Arc<dyn Store>, executor, reader, updater.clone(), base_settings());
    engine.start(CancellationToken::new()).await;

    let req = StartTransitionRequest {
        request_id: None,
        operation: Operation::On,
        node_ids: vec!["node-1".to_string()],
        requested_by: "tester".to_string(),
        dry_run: false,
    };
    let transition = engine.start_transition(&CancellationToken::new(), req).await.unwrap();
    let terminal = wait_terminal(&engine, transition.id).await;

    assert_eq!(terminal.state, TransitionPhase::Completed);
    assert_eq!(terminal.success_count, 1);
    assert_eq!(terminal.failure_count, 0);

    let tasks = engine.list_transition_tasks(transition.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskPhase::Succeeded);
    assert_eq!(tasks[0].attempt_count, 1);
    assert_eq!(tasks[0].final_power_state.as_deref(), Some("On"));

    let patched = updater.patched.lock().await;
    assert_eq!(patched.as_slice(), &[("node-1".to_string(), "On".to_string())]);

    let unsent = store.outbox_list_unsent(100).await.unwrap();
    assert!(unsent.iter().any(|e| e.event_type.contains("lifecycle")));
    assert!(unsent.iter().any(|e| e.event_type.contains("task")));
}

#[tokio::test]
async fn retries_transient_error_then_succeeds() {
    let store = Arc::new(InMemoryStore::new("powerctl-test"));
    map_nodes(&store, &[("node-1", "bmc-1", "https://bmc-1")]).await;

    let executor = Arc::new(ScriptedExecutor {
        scripts: Mutex::new(HashMap::from([(
            "node-1".to_string(),
            vec![
                Err(ExecutorError::Retryable("temporary transport error".to_string())),
                Err(ExecutorError::Retryable("temporary transport error".to_string())),
                Ok("/redfish/v1/Systems/node-1".to_string()),
            ],
        )])),
    });
    let reader = Arc::new(ScriptedReader { states: HashMap::from([("node-1".to_string(), "On".to_string())]) });
    let updater = Arc::new(RecordingUpdater { patched: Mutex::new(Vec::new()) });

    let mut settings = base_settings();
    settings.retry_attempts = 4;
    let engine = Engine::new(store.clone() as Arc<dyn Store>, executor, reader, updater, settings);
    engine.start(CancellationToken::new()).await;

    let req = StartTransitionRequest {
        request_id: None,
        operation: Operation::On,
        node_ids: vec!["node-1".to_string()],
        requested_by: "tester".to_string(),
        dry_run: false,
    };
    let transition = engine.start_transition(&CancellationToken::new(), req).await.unwrap();
    let terminal = wait_terminal(&engine, transition.id).await;

    assert_eq!(terminal.state, TransitionPhase::Completed);
    let tasks = engine.list_transition_tasks(transition.id).await.unwrap();
    assert_eq!(tasks[0].state, TaskPhase::Succeeded);
    assert_eq!(tasks[0].attempt_count, 3);
}

#[tokio::test]
async fn verification_timeout_on_one_node_yields_partial() {
    let store = Arc::new(InMemoryStore::new("powerctl-test"));
    map_nodes(
        &store,
        &[("node-ok", "bmc-1", "https://bmc-1"), ("node-bad", "bmc-2", "https://bmc-2")],
    )
    .await;

    let executor = Arc::new(ScriptedExecutor {
        scripts: Mutex::new(HashMap::from([
            ("node-ok".to_string(), vec![Ok("/redfish/v1/Systems/node-ok".to_string())]),
            ("node-bad".to_string(), vec![Ok("/redfish/v1/Systems/node-bad".to_string())]),
        ])),
    });
    let reader = Arc::new(ScriptedReader {
        states: HashMap::from([("node-ok".to_string(), "On".to_string()), ("node-bad".to_string(), "Off".to_string())]),
    });
    let updater = Arc::new(RecordingUpdater { patched: Mutex::new(Vec::new()) });

    let mut settings = base_settings();
    settings.verification_window = Duration::from_millis(60);
    settings.verification_poll = Duration::from_millis(5);
    let engine = Engine::new(store.clone() as Arc<dyn Store>, executor, reader, updater, settings);
    engine.start(CancellationToken::new()).await;

    let req = StartTransitionRequest {
        request_id: None,
        operation: Operation::On,
        node_ids: vec!["node-ok".to_string(), "node-bad".to_string()],
        requested_by: "tester".to_string(),
        dry_run: false,
    };
    let transition = engine.start_transition(&CancellationToken::new(), req).await.unwrap();
    let terminal = wait_terminal(&engine, transition.id).await;

    assert_eq!(terminal.state, TransitionPhase::Partial);
    assert_eq!(terminal.success_count, 1);
    assert_eq!(terminal.failure_count, 1);

    let tasks = engine.list_transition_tasks(transition.id).await.unwrap();
    let bad = tasks.iter().find(|t| t.node_id == "node-bad").unwrap();
    assert_eq!(bad.state, TaskPhase::Failed);
    assert!(bad.error_detail.as_deref().unwrap().contains("verification timed out"));
}

struct TrackingExecutor {
    hold: Duration,
    per_bmc_current: Mutex<HashMap<String, i64>>,
    per_bmc_max: Mutex<HashMap<String, i64>>,
    global_current: AtomicU32,
    global_max: AtomicU32,
}

#[async_trait]
impl powerctl_engine::Executor for TrackingExecutor {
    async fn execute(&self, ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        {
            let mut cur = self.per_bmc_current.lock().await;
            let c = cur.entry(ctx.bmc_id.clone()).or_insert(0);
            *c += 1;
            let mut max = self.per_bmc_max.lock().await;
            let m = max.entry(ctx.bmc_id.clone()).or_insert(0);
            *m = (*m).max(*c);
        }
        let g = self.global_current.fetch_add(1, Ordering::SeqCst) + 1;
        self.global_max.fetch_max(g, Ordering::SeqCst);

        tokio::time::sleep(self.hold).await;

        self.global_current.fetch_sub(1, Ordering::SeqCst);
        *self.per_bmc_current.lock().await.get_mut(&ctx.bmc_id).unwrap() -= 1;

        Ok(format!("/redfish/v1/Systems/{}", ctx.node_id))
    }
}

#[tokio::test]
async fn per_bmc_limit_serializes_concurrent_tasks() {
    let store = Arc::new(InMemoryStore::new("powerctl-test"));
    map_nodes(
        &store,
        &[
            ("node-1", "bmc-a", "https://bmc-a"),
            ("node-2", "bmc-a", "https://bmc-a"),
            ("node-3", "bmc-b", "https://bmc-b"),
            ("node-4", "bmc-b", "https://bmc-b"),
        ],
    )
    .await;

    let executor = Arc::new(TrackingExecutor {
        hold: Duration::from_millis(35),
        per_bmc_current: Mutex::new(HashMap::new()),
        per_bmc_max: Mutex::new(HashMap::new()),
        global_current: AtomicU32::new(0),
        global_max: AtomicU32::new(0),
    });
    let reader = Arc::new(ScriptedReader {
        states: HashMap::from([
            ("node-1".to_string(), "On".to_string()),
            ("node-2".to_string(), "On".to_string()),
            ("node-3".to_string(), "On".to_string()),
            ("node-4".to_string(), "On".to_string()),
        ]),
    });
    let updater = Arc::new(RecordingUpdater { patched: Mutex::new(Vec::new()) });

    let mut settings = base_settings();
    settings.global_concurrency = 2;
    settings.per_bmc_concurrency = 1;
    let engine = Engine::new(store.clone() as Arc<dyn Store>, executor.clone(), reader, updater, settings);
    engine.start(CancellationToken::new()).await;

    let req = StartTransitionRequest {
        request_id: None,
        operation: Operation::On,
        node_ids: vec!["node-1".into(), "node-2".into(), "node-3".into(), "node-4".into()],
        requested_by: "tester".to_string(),
        dry_run: false,
    };
    let transition = engine.start_transition(&CancellationToken::new(), req).await.unwrap();
    let terminal = wait_terminal(&engine, transition.id).await;

    assert_eq!(terminal.state, TransitionPhase::Completed);
    assert!(executor.global_max.load(Ordering::SeqCst) <= 2);
    let per_bmc_max = executor.per_bmc_max.lock().await;
    for (_bmc, max) in per_bmc_max.iter() {
        assert_eq!(*max, 1);
    }
}

struct NeverCalledExecutor;

#[async_trait]
impl powerctl_engine::Executor for NeverCalledExecutor {
    async fn execute(&self, _ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        panic!("executor must not be invoked for a dry run");
    }
}

struct NeverCalledReader;

#[async_trait]
impl PowerStateReader for NeverCalledReader {
    async fn read(&self, _ctx: &TaskExecutionContext, _system_path: &str) -> Result<String, String> {
        panic!("reader must not be invoked for a dry run");
    }
}

#[tokio::test]
async fn dry_run_plans_without_executing() {
    let store = Arc::new(InMemoryStore::new("powerctl-test"));
    map_nodes(&store, &[("node-1", "bmc-1", "https://bmc-1"), ("node-2", "bmc-2", "https://bmc-2")]).await;

    let updater = Arc::new(RecordingUpdater { patched: Mutex::new(Vec::new()) });
    let engine = Engine::new(
        store.clone() as Arc<dyn Store>,
        Arc::new(NeverCalledExecutor),
        Arc::new(NeverCalledReader),
        updater.clone(),
        base_settings(),
    );
    engine.start(CancellationToken::new()).await;

    let req = StartTransitionRequest {
        request_id: None,
        operation: Operation::On,
        node_ids: vec!["node-1".into(), "node-2".into()],
        requested_by: "tester".to_string(),
        dry_run: true,
    };
    let transition = engine.start_transition(&CancellationToken::new(), req).await.unwrap();

    assert_eq!(transition.state, TransitionPhase::Planned);
    let tasks = engine.list_transition_tasks(transition.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    for t in &tasks {
        assert_eq!(t.state, TaskPhase::Planned);
        assert_eq!(t.attempt_count, 0);
        assert!(t.completed_at.is_some());
    }
    assert!(updater.patched.lock().await.is_empty());
}

struct BlockingExecutor;

#[async_trait]
impl powerctl_engine::Executor for BlockingExecutor {
    async fn execute(&self, _ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

#[tokio::test]
async fn abort_cancels_running_tasks() {
    let store = Arc::new(InMemoryStore::new("powerctl-test"));
    map_nodes(&store, &[("node-1", "bmc-1", "https://bmc-1"), ("node-2", "bmc-2", "https://bmc-2")]).await;

    let reader = Arc::new(ScriptedReader { states: HashMap::new() });
    let updater = Arc::new(RecordingUpdater { patched: Mutex::new(Vec::new()) });
    let mut settings = base_settings();
    settings.global_concurrency = 2;
    let engine = Engine::new(store.clone() as Arc<dyn Store>, Arc::new(BlockingExecutor), reader, updater, settings);
    engine.start(CancellationToken::new()).await;

    let req = StartTransitionRequest {
        request_id: None,
        operation: Operation::On,
        node_ids: vec!["node-1".into(), "node-2".into()],
        requested_by: "tester".to_string(),
        dry_run: false,
    };
    let transition = engine.start_transition(&CancellationToken::new(), req).await.unwrap();

    // Let both tasks reach the blocked executor call before aborting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.abort_transition(transition.id).await.unwrap();

    let terminal = wait_terminal(&engine, transition.id).await;
    assert_eq!(terminal.state, TransitionPhase::Canceled);
    assert_eq!(terminal.success_count, 0);
    assert_eq!(terminal.failure_count, 2);

    let tasks = engine.list_transition_tasks(transition.id).await.unwrap();
    assert!(tasks.iter().all(|t: &Task| t.state == TaskPhase::Canceled));
}
