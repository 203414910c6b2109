//! Default test doubles: a no-op executor paired
//! with an "expected-state" reader that always reports whatever power
//! state the operation expects, so a transition driven by these doubles
//! always completes. Daemon/CLI-level integration tests reach for these
//! when they only need "the pipeline runs end to end", not control over
//! individual node outcomes — for that, use the scriptable fakes below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use powerctl_engine::{Executor, ExecutorError, PowerStateReader, StateUpdater, TaskExecutionContext};

/// Always succeeds, returning a synthetic Redfish system path.
pub struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    async fn execute(&self, ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        Ok(format!("/redfish/v1/Systems/{}", ctx.node_id))
    }
}

/// Reports whatever power state the task's operation expects, so
/// verification always observes a match on its first poll.
pub struct ExpectedStateReader;

#[async_trait]
impl PowerStateReader for ExpectedStateReader {
    async fn read(&self, ctx: &TaskExecutionContext, _system_path: &str) -> Result<String, String> {
        match ctx.operation.expected_power_state() {
            Some(state) => Ok(state.as_str().to_string()),
            None => Err(format!("operation {:?} has no expected power state", ctx.operation)),
        }
    }
}

/// Records every `(node_id, power_state)` patch it receives; always succeeds.
#[derive(Default)]
pub struct RecordingStateUpdater {
    pub patched: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl StateUpdater for RecordingStateUpdater {
    async fn patch(&self, node_id: &str, power_state: &str) -> Result<(), String> {
        self.patched.lock().await.push((node_id.to_string(), power_state.to_string()));
        Ok(())
    }
}

/// Per-node queue of scripted executor results, consumed in order. Panics
/// if a node it wasn't told about is executed, or a node's script runs dry
/// — the same shape the engine's own scenario tests use, exposed here for
/// reuse by daemon/CLI integration tests that need fine control.
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, Vec<Result<String, ExecutorError>>>>,
}

impl ScriptedExecutor {
    pub fn new(scripts: HashMap<String, Vec<Result<String, ExecutorError>>>) -> Arc<Self> {
        Arc::new(Self { scripts: Mutex::new(scripts) })
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        let mut scripts = self.scripts.lock().await;
        let entry = scripts
            .get_mut(&ctx.node_id)
            .unwrap_or_else(|| panic!("no executor script registered for node {}", ctx.node_id));
        if entry.is_empty() {
            panic!("executor script exhausted for node {}", ctx.node_id);
        }
        entry.remove(0)
    }
}

/// Per-node fixed power state report, falling back to `"Off"` for any node
/// not explicitly scripted.
pub struct ScriptedReader {
    states: HashMap<String, String>,
}

impl ScriptedReader {
    pub fn new(states: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self { states })
    }
}

#[async_trait]
impl PowerStateReader for ScriptedReader {
    async fn read(&self, ctx: &TaskExecutionContext, _system_path: &str) -> Result<String, String> {
        Ok(self.states.get(&ctx.node_id).cloned().unwrap_or_else(|| "Off".to_string()))
    }
}
