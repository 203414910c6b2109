//! Request/response DTOs for the HTTP surface. Kept separate from
//! [`powerctl_types`] so wire shape can diverge from storage shape without
//! touching the Store trait.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartTransitionBody {
    pub request_id: Option<String>,
    pub operation: String,
    pub node_ids: Vec<String>,
    pub requested_by: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub id: Uuid,
    pub aborted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListTransitionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Extracts every `node_id` pair from a raw query string. `GET
/// /v1/nodes/tasks?node_id=a&node_id=b` needs a repeatable key, which
/// `axum::extract::Query`'s struct-field deserialization can't express, so
/// the handler pulls it out of the `(String, String)` pair list instead.
pub fn extract_node_ids(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .filter(|(k, _)| k == "node_id")
        .map(|(_, v)| v.clone())
        .collect()
}
