use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

use powerctl_types::envelope::{
    EventEnvelope, TaskResultPayload, TransitionLifecyclePayload, TOPIC_TRANSITIONS_LIFECYCLE,
    TOPIC_TRANSITIONS_TASK_RESULT,
};
use powerctl_types::{
    new_outbox_event_id, BMCEndpoint, MappingErrorCode, MissingMapping, NodeBMCLink,
    NodePowerMapping, OutboxEvent, Task, Transition,
};

use crate::error::StoreError;
use crate::normalize::{normalize_endpoints, normalize_links};
use crate::store_trait::{ReplaceCounts, ResolvedMappings, Store};

/// In-memory [`Store`] test double, backed by a single `Mutex`-guarded set of
/// `BTreeMap`s for deterministic iteration order. Lives next to the real
/// Postgres store and implements the same trait, minus any network/database
/// I/O.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    service_name: String,
}

#[derive(Default)]
struct Inner {
    endpoints: BTreeMap<String, BMCEndpoint>,
    links: BTreeMap<String, NodeBMCLink>,
    transitions: BTreeMap<Uuid, Transition>,
    tasks: BTreeMap<Uuid, Task>,
    outbox: BTreeMap<String, OutboxEvent>,
    outbox_order: Vec<String>,
}

impl InMemoryStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            service_name: service_name.into(),
        }
    }

    fn lifecycle_envelope(&self, transition: &Transition) -> EventEnvelope<TransitionLifecyclePayload> {
        EventEnvelope::new(
            new_outbox_event_id(),
            self.service_name.clone(),
            transition.id.to_string(),
            transition.id.to_string(),
            TOPIC_TRANSITIONS_LIFECYCLE,
            TOPIC_TRANSITIONS_LIFECYCLE,
            TransitionLifecyclePayload {
                transition_id: transition.id.to_string(),
                snapshot: transition.clone(),
            },
        )
    }

    fn task_result_envelope(&self, transition_id: Uuid, task: &Task) -> EventEnvelope<TaskResultPayload> {
        EventEnvelope::new(
            new_outbox_event_id(),
            self.service_name.clone(),
            transition_id.to_string(),
            task.node_id.clone(),
            TOPIC_TRANSITIONS_TASK_RESULT,
            TOPIC_TRANSITIONS_TASK_RESULT,
            TaskResultPayload {
                transition_id: transition_id.to_string(),
                node_id: task.node_id.clone(),
                task_id: task.id.to_string(),
                snapshot: task.clone(),
            },
        )
    }

    fn push_outbox(inner: &mut Inner, id: String, event_type: &str, subject: &str, data: Vec<u8>) {
        inner.outbox.insert(
            id.clone(),
            OutboxEvent {
                id: id.clone(),
                event_type: event_type.to_string(),
                subject: subject.to_string(),
                data,
                created_at: Utc::now(),
                sent_at: None,
            },
        );
        inner.outbox_order.push(id);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn replace_topology_mappings(
        &self,
        endpoints: Vec<BMCEndpoint>,
        links: Vec<NodeBMCLink>,
        synced_at: DateTime<Utc>,
    ) -> Result<ReplaceCounts, StoreError> {
        let endpoints = normalize_endpoints(endpoints, synced_at);
        let links = normalize_links(links, synced_at);

        let mut inner = self.inner.lock().unwrap();

        let desired_endpoint_ids: std::collections::BTreeSet<_> =
            endpoints.iter().map(|e| e.bmc_id.clone()).collect();
        let before_endpoints = inner.endpoints.len();
        inner.endpoints.retain(|id, _| desired_endpoint_ids.contains(id));
        let deleted_endpoints = before_endpoints - inner.endpoints.len();
        let mut upserted_endpoints = 0usize;
        for e in endpoints {
            inner.endpoints.insert(e.bmc_id.clone(), e);
            upserted_endpoints += 1;
        }

        let desired_link_ids: std::collections::BTreeSet<_> = links.iter().map(|l| l.node_id.clone()).collect();
        let before_links = inner.links.len();
        inner.links.retain(|id, _| desired_link_ids.contains(id));
        let deleted_links = before_links - inner.links.len();
        let mut upserted_links = 0usize;
        for l in links {
            inner.links.insert(l.node_id.clone(), l);
            upserted_links += 1;
        }

        Ok(ReplaceCounts {
            upserted_endpoints,
            deleted_endpoints,
            upserted_links,
            deleted_links,
        })
    }

    async fn resolve_node_mappings(&self, node_ids: &[String]) -> Result<ResolvedMappings, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out = ResolvedMappings::default();
        for node_id in node_ids {
            let Some(link) = inner.links.get(node_id) else {
                out.missing.push(MissingMapping {
                    node_id: node_id.clone(),
                    code: MappingErrorCode::NotFound,
                    detail: format!(
                        "node {node_id} has no topology mapping; run a sync or check the inventory service"
                    ),
                });
                continue;
            };
            let Some(ep) = inner.endpoints.get(&link.bmc_id) else {
                out.missing.push(MissingMapping {
                    node_id: node_id.clone(),
                    code: MappingErrorCode::EndpointMissing,
                    detail: format!(
                        "bmc {} for node {node_id} has no endpoint record; re-run topology sync",
                        link.bmc_id
                    ),
                });
                continue;
            };
            if ep.endpoint.trim().is_empty() {
                out.missing.push(MissingMapping {
                    node_id: node_id.clone(),
                    code: MappingErrorCode::EndpointMissing,
                    detail: format!("bmc {} has an empty endpoint; an operator must fix it", ep.bmc_id),
                });
                continue;
            }
            out.resolved.push(NodePowerMapping {
                node_id: node_id.clone(),
                bmc_id: ep.bmc_id.clone(),
                endpoint: ep.endpoint.clone(),
                credential_id: ep.credential_id.clone(),
                insecure_skip_verify: ep.insecure_skip_verify,
            });
        }
        Ok(out)
    }

    async fn create_transition(
        &self,
        mut transition: Transition,
        mut tasks: Vec<Task>,
    ) -> Result<(Transition, Vec<Task>), StoreError> {
        if transition.id.is_nil() {
            transition.id = Uuid::new_v4();
        }
        for t in &mut tasks {
            if t.id.is_nil() {
                t.id = Uuid::new_v4();
            }
            t.transition_id = transition.id;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.transitions.insert(transition.id, transition.clone());
        for t in &tasks {
            inner.tasks.insert(t.id, t.clone());
        }

        let lifecycle = self.lifecycle_envelope(&transition);
        let data = serde_json::to_vec(&lifecycle).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::push_outbox(&mut inner, lifecycle.event_id, TOPIC_TRANSITIONS_LIFECYCLE, &transition.id.to_string(), data);

        if transition.state.is_terminal() {
            for t in &tasks {
                let env = self.task_result_envelope(transition.id, t);
                let data = serde_json::to_vec(&env).map_err(|e| StoreError::Backend(e.to_string()))?;
                Self::push_outbox(&mut inner, env.event_id, TOPIC_TRANSITIONS_TASK_RESULT, &t.node_id, data);
            }
        }

        Ok((transition, tasks))
    }

    async fn update_transition(&self, transition: Transition) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transitions.contains_key(&transition.id) {
            return Err(StoreError::NotFound(format!("transition {}", transition.id)));
        }
        let is_terminal = transition.state.is_terminal();
        inner.transitions.insert(transition.id, transition.clone());
        if is_terminal {
            let env = self.lifecycle_envelope(&transition);
            let data = serde_json::to_vec(&env).map_err(|e| StoreError::Backend(e.to_string()))?;
            Self::push_outbox(&mut inner, env.event_id, TOPIC_TRANSITIONS_LIFECYCLE, &transition.id.to_string(), data);
        }
        Ok(())
    }

    async fn update_transition_task(&self, task: Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tasks.contains_key(&task.id) {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }
        let is_terminal = task.state.is_terminal();
        inner.tasks.insert(task.id, task.clone());
        if is_terminal {
            let env = self.task_result_envelope(task.transition_id, &task);
            let data = serde_json::to_vec(&env).map_err(|e| StoreError::Backend(e.to_string()))?;
            Self::push_outbox(&mut inner, env.event_id, TOPIC_TRANSITIONS_TASK_RESULT, &task.node_id, data);
        }
        Ok(())
    }

    async fn list_transitions(&self, limit: i64, offset: i64) -> Result<Vec<Transition>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<_> = inner.transitions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_transition(&self, id: Uuid) -> Result<Transition, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .transitions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("transition {id}")))
    }

    async fn list_transition_tasks(&self, transition_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| t.transition_id == transition_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(out)
    }

    async fn list_latest_transition_tasks_by_node(
        &self,
        node_ids: &[String],
    ) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let wanted: std::collections::BTreeSet<&String> = node_ids.iter().collect();
        let mut latest: BTreeMap<String, Task> = BTreeMap::new();
        for t in inner.tasks.values() {
            if !wanted.contains(&t.node_id) {
                continue;
            }
            match latest.get(&t.node_id) {
                Some(existing)
                    if (existing.updated_at, existing.created_at) >= (t.updated_at, t.created_at) => {}
                _ => {
                    latest.insert(t.node_id.clone(), t.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn outbox_claim_batch(&self, limit: i64, _dispatcher_id: &str) -> Result<Vec<OutboxEvent>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut unsent: Vec<_> = inner
            .outbox_order
            .iter()
            .filter_map(|id| inner.outbox.get(id))
            .filter(|e| e.sent_at.is_none())
            .cloned()
            .collect();
        unsent.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        unsent.truncate(limit.max(0) as usize);
        Ok(unsent)
    }

    async fn outbox_mark_sent(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.outbox.get_mut(id) {
            if e.sent_at.is_none() {
                e.sent_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn outbox_list_unsent(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        self.outbox_claim_batch(limit, "inspection").await
    }
}
