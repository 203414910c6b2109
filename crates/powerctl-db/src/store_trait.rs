use async_trait::async_trait;
use chrono::{DateTime, Utc};
use powerctl_types::{BMCEndpoint, MissingMapping, NodeBMCLink, NodePowerMapping, OutboxEvent, Task, Transition};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceCounts {
    pub upserted_endpoints: usize,
    pub deleted_endpoints: usize,
    pub upserted_links: usize,
    pub deleted_links: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedMappings {
    pub resolved: Vec<NodePowerMapping>,
    pub missing: Vec<MissingMapping>,
}

/// Durable persistence of mappings, transitions, tasks, and outbox events.
///
/// Implemented by [`crate::postgres::PostgresStore`] for production and
/// [`crate::memory::InMemoryStore`] for tests that don't need a live database.
/// `Send + Sync` so it can be shared behind `Arc<dyn Store>` across the worker
/// pool.
#[async_trait]
pub trait Store: Send + Sync {
    async fn replace_topology_mappings(
        &self,
        endpoints: Vec<BMCEndpoint>,
        links: Vec<NodeBMCLink>,
        synced_at: DateTime<Utc>,
    ) -> Result<ReplaceCounts, StoreError>;

    async fn resolve_node_mappings(&self, node_ids: &[String]) -> Result<ResolvedMappings, StoreError>;

    /// Inserts the transition and all task rows atomically, along with the
    /// initial (and, if already terminal, final) outbox rows.
    async fn create_transition(
        &self,
        transition: Transition,
        tasks: Vec<Task>,
    ) -> Result<(Transition, Vec<Task>), StoreError>;

    /// Updates a transition row by id. A terminal update additionally appends
    /// the lifecycle outbox event in the same transaction.
    async fn update_transition(&self, transition: Transition) -> Result<(), StoreError>;

    /// Updates a task row by id. A terminal update additionally appends the
    /// task-result outbox event in the same transaction.
    async fn update_transition_task(&self, task: Task) -> Result<(), StoreError>;

    async fn list_transitions(&self, limit: i64, offset: i64) -> Result<Vec<Transition>, StoreError>;

    async fn get_transition(&self, id: Uuid) -> Result<Transition, StoreError>;

    async fn list_transition_tasks(&self, transition_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Selects a single, most-recent row per node (by `updated_at` then `created_at`).
    async fn list_latest_transition_tasks_by_node(
        &self,
        node_ids: &[String],
    ) -> Result<Vec<Task>, StoreError>;

    /// Atomically claims up to `limit` unsent outbox rows, in `created_at, id`
    /// order, for exclusive processing by `dispatcher_id`.
    async fn outbox_claim_batch(&self, limit: i64, dispatcher_id: &str) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Idempotent: marks `sent_at = now()`.
    async fn outbox_mark_sent(&self, id: &str) -> Result<(), StoreError>;

    async fn outbox_list_unsent(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError>;
}
