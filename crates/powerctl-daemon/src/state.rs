//! Shared runtime state for powerctl-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself
//! beyond wiring the three long-running loops (engine workers, topology
//! syncer, outbox relay) at startup.

use std::sync::Arc;

use serde::Serialize;

use powerctl_engine::Engine;
use powerctl_outbox::Relay;
use powerctl_topology::Syncer;

#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub syncer: Arc<Syncer>,
    pub relay: Arc<Relay>,
    pub build: BuildInfo,
    /// Shared-secret bearer token gating mutating routes. Empty disables
    /// the check — only appropriate for local/dev use, never production.
    pub admin_token: String,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, syncer: Arc<Syncer>, relay: Arc<Relay>, admin_token: impl Into<String>) -> Self {
        Self {
            engine,
            syncer,
            relay,
            build: BuildInfo { service: "powerctl-daemon", version: env!("CARGO_PKG_VERSION") },
            admin_token: admin_token.into(),
        }
    }
}

/// Serializable view over [`powerctl_topology::SyncerStatus`] — built
/// field-by-field rather than deriving on the upstream type, since that
/// type lives in a different crate from this response DTO.
#[derive(Clone, Debug, Serialize)]
pub struct SyncerStatusView {
    pub ready: bool,
    pub last_attempt: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
}

impl From<powerctl_topology::SyncerStatus> for SyncerStatusView {
    fn from(s: powerctl_topology::SyncerStatus) -> Self {
        Self {
            ready: s.ready,
            last_attempt: s.last_attempt,
            last_error: s.last_error,
            success_count: s.success_count,
            failure_count: s.failure_count,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub syncer: SyncerStatusView,
}
