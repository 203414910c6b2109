//! Resolves credentials, caches each node's Redfish system path, and issues
//! the reset action. Classifies failures as retryable or terminal so the
//! runner knows whether to back off and try again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use powerctl_redfish::{select_system_path, Credential, CredentialResolver, RedfishClient, RedfishError};
use powerctl_types::Operation;

/// Everything the Executor/Verifier pipeline needs for one task attempt.
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    pub transition_id: Uuid,
    pub task_id: Uuid,
    pub node_id: String,
    pub bmc_id: String,
    pub endpoint: String,
    pub credential_id: String,
    pub insecure_skip_verify: bool,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
pub enum ExecutorError {
    Retryable(String),
    Terminal(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::Retryable(s) => write!(f, "{s}"),
            ExecutorError::Terminal(s) => write!(f, "{s}"),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Resets the target system, returning the Redfish system path it acted
    /// on (so the Verifier can poll the same path without re-resolving it).
    async fn execute(&self, ctx: &TaskExecutionContext) -> Result<String, ExecutorError>;
}

pub struct RedfishExecutor {
    redfish: Arc<dyn RedfishClient>,
    credentials: Arc<dyn CredentialResolver>,
    path_cache: Mutex<HashMap<(String, String), String>>,
}

impl RedfishExecutor {
    pub fn new(redfish: Arc<dyn RedfishClient>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            redfish,
            credentials,
            path_cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Executor for RedfishExecutor {
    async fn execute(&self, ctx: &TaskExecutionContext) -> Result<String, ExecutorError> {
        let cred = self.credentials.resolve(&ctx.credential_id);
        // Keyed by node, not BMC: a chassis BMC serves several nodes, each
        // with its own system path, so caching by BMC alone would hand a
        // second node the first node's path.
        let key = (ctx.endpoint.clone(), ctx.node_id.clone());

        let cached = { self.path_cache.lock().await.get(&key).cloned() };
        let path = match cached {
            Some(p) => p,
            None => {
                let path = self.resolve_system_path(ctx, &cred).await?;
                self.path_cache.lock().await.insert(key, path.clone());
                path
            }
        };

        self.redfish
            .reset_system(&ctx.endpoint, &path, &cred, ctx.insecure_skip_verify, ctx.operation)
            .await
            .map_err(classify)?;
        Ok(path)
    }
}

impl RedfishExecutor {
    async fn resolve_system_path(&self, ctx: &TaskExecutionContext, cred: &Credential) -> Result<String, ExecutorError> {
        let paths = self
            .redfish
            .list_system_paths(&ctx.endpoint, cred, ctx.insecure_skip_verify)
            .await
            .map_err(classify)?;
        select_system_path(&paths, &ctx.node_id)
            .ok_or_else(|| ExecutorError::Terminal(format!("bmc {} exposes no redfish system path", ctx.bmc_id)))
    }
}

fn classify(e: RedfishError) -> ExecutorError {
    if e.is_retryable() {
        ExecutorError::Retryable(e.to_string())
    } else {
        ExecutorError::Terminal(e.to_string())
    }
}
