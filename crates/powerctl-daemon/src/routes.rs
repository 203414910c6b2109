//! HTTP surface: a thin JSON wrapper over the Engine, Syncer, and
//! Relay. Read routes are open; the two mutating routes sit behind the
//! bearer-token middleware in [`auth_layer`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use powerctl_engine::{EngineError, StartTransitionRequest};
use powerctl_types::Operation;

use crate::api_types::{extract_node_ids, AbortResponse, ErrorBody, ListTransitionsQuery, StartTransitionBody};
use crate::state::{AppState, StatusResponse, SyncerStatusView};

pub fn build_router(state: Arc<AppState>) -> Router {
    let mutating = Router::new()
        .route("/v1/transitions", post(start_transition))
        .route("/v1/transitions/:id/abort", post(abort_transition))
        .route("/v1/sync", post(trigger_sync))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), auth_layer));

    let reads = Router::new()
        .route("/v1/transitions/:id", get(get_transition))
        .route("/v1/transitions", get(list_transitions))
        .route("/v1/nodes/tasks", get(list_node_tasks))
        .route("/v1/status", get(status))
        .route("/v1/healthz", get(healthz));

    mutating.merge(reads).with_state(state)
}

/// Shared-secret bearer-token check. An empty `admin_token` disables the
/// check entirely — only fit for local/dev, never production.
async fn auth_layer(State(state): State<Arc<AppState>>, headers: HeaderMap, req: axum::extract::Request, next: Next) -> Response {
    if state.admin_token.is_empty() {
        return next.run(req).await;
    }
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == state.admin_token => next.run(req).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

enum ApiError {
    Engine(EngineError),
    Unauthorized,
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid bearer token".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Engine(EngineError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Engine(EngineError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            ApiError::Engine(EngineError::Conflict(msg)) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Engine(e @ EngineError::NotStarted) => {
                error!(error = %e, "engine not started");
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::Engine(e @ EngineError::Store(_)) => {
                error!(error = %e, "store error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

async fn start_transition(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartTransitionBody>,
) -> Result<Json<powerctl_types::Transition>, ApiError> {
    let operation = Operation::parse(&body.operation)
        .ok_or_else(|| ApiError::BadRequest(format!("unrecognized operation: {}", body.operation)))?;
    let req = StartTransitionRequest {
        request_id: body.request_id,
        operation,
        node_ids: body.node_ids,
        requested_by: body.requested_by,
        dry_run: body.dry_run,
    };
    // Requests are not individually cancelable at the HTTP boundary; a fresh
    // token ties the mapping-resolution phase to this call's own lifetime.
    let transition = state.engine.start_transition(&CancellationToken::new(), req).await?;
    Ok(Json(transition))
}

async fn abort_transition(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<AbortResponse>, ApiError> {
    state.engine.abort_transition(id).await?;
    Ok(Json(AbortResponse { id, aborted: true }))
}

async fn get_transition(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<powerctl_types::Transition>, ApiError> {
    let transition = state.engine.get_transition(id).await?;
    Ok(Json(transition))
}

async fn list_transitions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTransitionsQuery>,
) -> Result<Json<Vec<powerctl_types::Transition>>, ApiError> {
    let transitions = state.engine.list_transitions(query.limit, query.offset).await?;
    Ok(Json(transitions))
}

async fn list_node_tasks(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<powerctl_types::Task>>, ApiError> {
    let node_ids = extract_node_ids(&pairs);
    if node_ids.is_empty() {
        return Err(ApiError::BadRequest("at least one node_id query parameter is required".to_string()));
    }
    let tasks = state.engine.list_latest_tasks_by_node(&node_ids).await?;
    Ok(Json(tasks))
}

/// Runs one topology reconciliation cycle out of band from the periodic
/// timer, for the CLI's `sync` command and for operators forcing a
/// reconcile after a known inventory change.
async fn trigger_sync(State(state): State<Arc<AppState>>) -> Result<Json<SyncerStatusView>, ApiError> {
    state
        .syncer
        .trigger_once()
        .await
        .map_err(|e| ApiError::Engine(EngineError::Conflict(e)))?;
    Ok(Json(state.syncer.status().await.into()))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let syncer_status: SyncerStatusView = state.syncer.status().await.into();
    Json(StatusResponse {
        service: state.build.service,
        version: state.build.version,
        syncer: syncer_status,
    })
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
