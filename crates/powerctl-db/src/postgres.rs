use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use powerctl_types::envelope::{
    EventEnvelope, TaskResultPayload, TransitionLifecyclePayload, TOPIC_TRANSITIONS_LIFECYCLE,
    TOPIC_TRANSITIONS_TASK_RESULT,
};
use powerctl_types::{
    new_outbox_event_id, BMCEndpoint, MappingErrorCode, MissingMapping, NodeBMCLink,
    NodePowerMapping, Operation, OutboxEvent, Task, TaskPhase, Transition, TransitionPhase,
};

use crate::error::StoreError;
use crate::normalize::{normalize_endpoints, normalize_links};
use crate::store_trait::{ReplaceCounts, ResolvedMappings, Store};

pub const ENV_DATABASE_URL: &str = "POWERCTL_DATABASE_URL";

/// Postgres-backed [`Store`], using plain `sqlx::query` + `row.try_get`
/// rather than the compile-time-checked `query!` macros (keeps the store
/// independent of a live database at build time).
pub struct PostgresStore {
    pool: PgPool,
    service_name: String,
}

impl PostgresStore {
    pub fn new(pool: PgPool, service_name: impl Into<String>) -> Self {
        Self {
            pool,
            service_name: service_name.into(),
        }
    }

    pub async fn connect_from_env(service_name: impl Into<String>) -> anyhow::Result<Self> {
        let url = std::env::var(ENV_DATABASE_URL)
            .map_err(|_| anyhow::anyhow!("missing env var {ENV_DATABASE_URL}"))?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await?;
        Ok(Self::new(pool, service_name))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
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
}

async fn append_outbox_row<'a>(
    tx: &mut sqlx::Transaction<'a, sqlx::Postgres>,
    id: &str,
    event_type: &str,
    subject: &str,
    data: &[u8],
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into outbox_events (id, event_type, subject, data)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(event_type)
    .bind(subject)
    .bind(data)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn task_row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task, StoreError> {
    let operation: String = row.try_get("operation")?;
    let state: String = row.try_get("state")?;
    Ok(Task {
        id: row.try_get("id")?,
        transition_id: row.try_get("transition_id")?,
        node_id: row.try_get("node_id")?,
        bmc_id: row.try_get("bmc_id")?,
        bmc_endpoint: row.try_get("bmc_endpoint")?,
        credential_id: row.try_get("credential_id")?,
        insecure_skip_verify: row.try_get("insecure_skip_verify")?,
        operation: Operation::parse(&operation)
            .ok_or_else(|| StoreError::Backend(format!("unknown operation {operation}")))?,
        state: TaskPhase::parse(&state)
            .ok_or_else(|| StoreError::Backend(format!("unknown task state {state}")))?,
        dry_run: row.try_get("dry_run")?,
        attempt_count: row.try_get("attempt_count")?,
        final_power_state: row.try_get("final_power_state")?,
        error_detail: row.try_get("error_detail")?,
        queued_at: row.try_get("queued_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transition_row_to_transition(row: &sqlx::postgres::PgRow) -> Result<Transition, StoreError> {
    let operation: String = row.try_get("operation")?;
    let state: String = row.try_get("state")?;
    Ok(Transition {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        operation: Operation::parse(&operation)
            .ok_or_else(|| StoreError::Backend(format!("unknown operation {operation}")))?,
        state: TransitionPhase::parse(&state)
            .ok_or_else(|| StoreError::Backend(format!("unknown transition state {state}")))?,
        requested_by: row.try_get("requested_by")?,
        dry_run: row.try_get("dry_run")?,
        target_count: row.try_get("target_count")?,
        success_count: row.try_get("success_count")?,
        failure_count: row.try_get("failure_count")?,
        queued_at: row.try_get("queued_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn replace_topology_mappings(
        &self,
        endpoints: Vec<BMCEndpoint>,
        links: Vec<NodeBMCLink>,
        synced_at: DateTime<Utc>,
    ) -> Result<ReplaceCounts, StoreError> {
        let endpoints = normalize_endpoints(endpoints, synced_at);
        let links = normalize_links(links, synced_at);

        let mut tx = self.pool.begin().await?;

        let endpoint_ids: Vec<String> = endpoints.iter().map(|e| e.bmc_id.clone()).collect();
        let mut upserted_endpoints = 0usize;
        for e in &endpoints {
            sqlx::query(
                r#"
                insert into bmc_endpoints
                    (bmc_id, endpoint, credential_id, insecure_skip_verify, source, last_synced_at, updated_at)
                values ($1, $2, $3, $4, $5, $6, now())
                on conflict (bmc_id) do update set
                    endpoint = excluded.endpoint,
                    source = excluded.source,
                    last_synced_at = excluded.last_synced_at,
                    updated_at = now()
                "#,
            )
            .bind(&e.bmc_id)
            .bind(&e.endpoint)
            .bind(&e.credential_id)
            .bind(e.insecure_skip_verify)
            .bind(&e.source)
            .bind(e.last_synced_at)
            .execute(&mut *tx)
            .await?;
            upserted_endpoints += 1;
        }

        let deleted_endpoints = if endpoint_ids.is_empty() {
            sqlx::query("delete from bmc_endpoints")
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize
        } else {
            sqlx::query("delete from bmc_endpoints where not (bmc_id = any($1))")
                .bind(&endpoint_ids)
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize
        };

        let link_ids: Vec<String> = links.iter().map(|l| l.node_id.clone()).collect();
        let mut upserted_links = 0usize;
        for l in &links {
            sqlx::query(
                r#"
                insert into node_bmc_links (node_id, bmc_id, source, last_synced_at, updated_at)
                values ($1, $2, $3, $4, now())
                on conflict (node_id) do update set
                    bmc_id = excluded.bmc_id,
                    source = excluded.source,
                    last_synced_at = excluded.last_synced_at,
                    updated_at = now()
                "#,
            )
            .bind(&l.node_id)
            .bind(&l.bmc_id)
            .bind(&l.source)
            .bind(l.last_synced_at)
            .execute(&mut *tx)
            .await?;
            upserted_links += 1;
        }

        let deleted_links = if link_ids.is_empty() {
            sqlx::query("delete from node_bmc_links")
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize
        } else {
            sqlx::query("delete from node_bmc_links where not (node_id = any($1))")
                .bind(&link_ids)
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize
        };

        tx.commit().await?;

        Ok(ReplaceCounts {
            upserted_endpoints,
            deleted_endpoints,
            upserted_links,
            deleted_links,
        })
    }

    async fn resolve_node_mappings(&self, node_ids: &[String]) -> Result<ResolvedMappings, StoreError> {
        let mut out = ResolvedMappings::default();
        for node_id in node_ids {
            let link = sqlx::query("select bmc_id from node_bmc_links where node_id = $1")
                .bind(node_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(link) = link else {
                out.missing.push(MissingMapping {
                    node_id: node_id.clone(),
                    code: MappingErrorCode::NotFound,
                    detail: format!(
                        "node {node_id} has no topology mapping; run a sync or check the inventory service"
                    ),
                });
                continue;
            };
            let bmc_id: String = link.try_get("bmc_id")?;

            let ep = sqlx::query(
                "select endpoint, credential_id, insecure_skip_verify from bmc_endpoints where bmc_id = $1",
            )
            .bind(&bmc_id)
            .fetch_optional(&self.pool)
            .await?;
            let Some(ep) = ep else {
                out.missing.push(MissingMapping {
                    node_id: node_id.clone(),
                    code: MappingErrorCode::EndpointMissing,
                    detail: format!(
                        "bmc {bmc_id} for node {node_id} has no endpoint record; re-run topology sync"
                    ),
                });
                continue;
            };

            let endpoint: String = ep.try_get("endpoint")?;
            let credential_id: String = ep.try_get("credential_id")?;
            let insecure_skip_verify: bool = ep.try_get("insecure_skip_verify")?;

            if endpoint.trim().is_empty() {
                out.missing.push(MissingMapping {
                    node_id: node_id.clone(),
                    code: MappingErrorCode::EndpointMissing,
                    detail: format!("bmc {bmc_id} has an empty endpoint; an operator must fix it"),
                });
                continue;
            }

            out.resolved.push(NodePowerMapping {
                node_id: node_id.clone(),
                bmc_id,
                endpoint,
                credential_id,
                insecure_skip_verify,
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

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            insert into transitions
                (id, request_id, operation, state, requested_by, dry_run, target_count,
                 success_count, failure_count, queued_at, started_at, completed_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(transition.id)
        .bind(&transition.request_id)
        .bind(transition.operation.as_str())
        .bind(transition.state.as_str())
        .bind(&transition.requested_by)
        .bind(transition.dry_run)
        .bind(transition.target_count)
        .bind(transition.success_count)
        .bind(transition.failure_count)
        .bind(transition.queued_at)
        .bind(transition.started_at)
        .bind(transition.completed_at)
        .execute(&mut *tx)
        .await?;

        for t in &tasks {
            sqlx::query(
                r#"
                insert into transition_tasks
                    (id, transition_id, node_id, bmc_id, bmc_endpoint, credential_id,
                     insecure_skip_verify, operation, state, dry_run, attempt_count,
                     final_power_state, error_detail, queued_at, started_at, completed_at)
                values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(t.id)
            .bind(t.transition_id)
            .bind(&t.node_id)
            .bind(&t.bmc_id)
            .bind(&t.bmc_endpoint)
            .bind(&t.credential_id)
            .bind(t.insecure_skip_verify)
            .bind(t.operation.as_str())
            .bind(t.state.as_str())
            .bind(t.dry_run)
            .bind(t.attempt_count)
            .bind(&t.final_power_state)
            .bind(&t.error_detail)
            .bind(t.queued_at)
            .bind(t.started_at)
            .bind(t.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        let lifecycle = self.lifecycle_envelope(&transition);
        let data = serde_json::to_vec(&lifecycle).map_err(|e| StoreError::Backend(e.to_string()))?;
        append_outbox_row(
            &mut tx,
            &lifecycle.event_id,
            TOPIC_TRANSITIONS_LIFECYCLE,
            &transition.id.to_string(),
            &data,
        )
        .await?;

        if transition.state.is_terminal() {
            for t in &tasks {
                let env = self.task_result_envelope(transition.id, t);
                let data = serde_json::to_vec(&env).map_err(|e| StoreError::Backend(e.to_string()))?;
                append_outbox_row(&mut tx, &env.event_id, TOPIC_TRANSITIONS_TASK_RESULT, &t.node_id, &data)
                    .await?;
            }
        }

        tx.commit().await?;

        Ok((transition, tasks))
    }

    async fn update_transition(&self, transition: Transition) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            update transitions set
                state = $2, success_count = $3, failure_count = $4,
                started_at = $5, completed_at = $6, updated_at = now()
            where id = $1
            "#,
        )
        .bind(transition.id)
        .bind(transition.state.as_str())
        .bind(transition.success_count)
        .bind(transition.failure_count)
        .bind(transition.started_at)
        .bind(transition.completed_at)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transition {}", transition.id)));
        }

        if transition.state.is_terminal() {
            let env = self.lifecycle_envelope(&transition);
            let data = serde_json::to_vec(&env).map_err(|e| StoreError::Backend(e.to_string()))?;
            append_outbox_row(&mut tx, &env.event_id, TOPIC_TRANSITIONS_LIFECYCLE, &transition.id.to_string(), &data)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_transition_task(&self, task: Task) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            update transition_tasks set
                state = $2, attempt_count = $3, final_power_state = $4, error_detail = $5,
                started_at = $6, completed_at = $7, updated_at = now()
            where id = $1
            "#,
        )
        .bind(task.id)
        .bind(task.state.as_str())
        .bind(task.attempt_count)
        .bind(&task.final_power_state)
        .bind(&task.error_detail)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }

        if task.state.is_terminal() {
            let env = self.task_result_envelope(task.transition_id, &task);
            let data = serde_json::to_vec(&env).map_err(|e| StoreError::Backend(e.to_string()))?;
            append_outbox_row(&mut tx, &env.event_id, TOPIC_TRANSITIONS_TASK_RESULT, &task.node_id, &data)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_transitions(&self, limit: i64, offset: i64) -> Result<Vec<Transition>, StoreError> {
        let rows = sqlx::query(
            "select * from transitions order by created_at desc, id desc limit $1 offset $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transition_row_to_transition).collect()
    }

    async fn get_transition(&self, id: Uuid) -> Result<Transition, StoreError> {
        let row = sqlx::query("select * from transitions where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("transition {id}")))?;
        transition_row_to_transition(&row)
    }

    async fn list_transition_tasks(&self, transition_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "select * from transition_tasks where transition_id = $1 order by node_id asc",
        )
        .bind(transition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_row_to_task).collect()
    }

    async fn list_latest_transition_tasks_by_node(
        &self,
        node_ids: &[String],
    ) -> Result<Vec<Task>, StoreError> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            select distinct on (node_id) *
            from transition_tasks
            where node_id = any($1)
            order by node_id asc, updated_at desc, created_at desc
            "#,
        )
        .bind(node_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_row_to_task).collect()
    }

    async fn outbox_claim_batch(&self, limit: i64, dispatcher_id: &str) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            with to_claim as (
                select id
                from outbox_events
                where sent_at is null
                order by created_at asc, id asc
                limit $1
                for update skip locked
            )
            update outbox_events
               set claimed_by = $2, claimed_at = now()
             where id in (select id from to_claim)
            returning id, event_type, subject, data, created_at, sent_at
            "#,
        )
        .bind(limit)
        .bind(dispatcher_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let data: Vec<u8> = row.try_get("data")?;
            out.push(OutboxEvent {
                id: row.try_get("id")?,
                event_type: row.try_get("event_type")?,
                subject: row.try_get("subject")?,
                data,
                created_at: row.try_get("created_at")?,
                sent_at: row.try_get("sent_at")?,
            });
        }
        Ok(out)
    }

    async fn outbox_mark_sent(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("update outbox_events set sent_at = now() where id = $1 and sent_at is null")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn outbox_list_unsent(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows = sqlx::query(
            "select id, event_type, subject, data, created_at, sent_at from outbox_events \
             where sent_at is null order by created_at asc, id asc limit $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let data: Vec<u8> = row.try_get("data")?;
            out.push(OutboxEvent {
                id: row.try_get("id")?,
                event_type: row.try_get("event_type")?,
                subject: row.try_get("subject")?,
                data,
                created_at: row.try_get("created_at")?,
                sent_at: row.try_get("sent_at")?,
            });
        }
        Ok(out)
    }
}
