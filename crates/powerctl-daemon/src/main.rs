//! powerctl-daemon entry point.
//!
//! Thin by design: loads config and secrets, wires the Store/Redfish/
//! Inventory collaborators into an Engine, Syncer, and Relay, starts their
//! background loops, and serves the HTTP surface. All route handlers live
//! in `routes.rs`; all shared state lives in `state.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use powerctl_config::Secrets;
use powerctl_daemon::{routes, state::AppState};
use powerctl_db::PostgresStore;
use powerctl_engine::{Engine, InventoryStateUpdater, RedfishExecutor, RedfishPowerStateReader};
use powerctl_inventory::ReqwestInventoryClient;
use powerctl_outbox::{LoggingPublisher, Relay};
use powerctl_redfish::{EnvCredentialResolver, ReqwestRedfishClient};
use powerctl_topology::Syncer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_paths = config_paths_from_env();
    let config_path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let loaded = powerctl_config::load_layered_yaml(&config_path_refs).context("load engine configuration")?;
    let settings = loaded.engine_settings().context("decode engine settings")?;
    info!(config_hash = %loaded.config_hash, "loaded configuration");

    let secrets = Secrets::from_env().context("load secrets from environment")?;

    let store = Arc::new(PostgresStore::connect_from_env("powerctl-daemon").await.context("connect to database")?);
    store.migrate().await.context("run database migrations")?;

    let credentials = Arc::new(EnvCredentialResolver);
    let redfish = Arc::new(ReqwestRedfishClient::new());
    let inventory = Arc::new(ReqwestInventoryClient::new(secrets.inventory_base_url.clone(), secrets.inventory_token.clone()));

    let executor = Arc::new(RedfishExecutor::new(redfish.clone(), credentials.clone()));
    let reader = Arc::new(RedfishPowerStateReader::new(redfish.clone(), credentials.clone()));
    let updater = Arc::new(InventoryStateUpdater::new(inventory.clone()));

    let engine = Engine::new(store.clone(), executor, reader, updater, settings.clone());
    let syncer = Syncer::new(
        inventory,
        store.clone(),
        settings.sync_interval,
        settings.startup_retry_interval,
        settings.default_credential_id.clone(),
    );
    let publisher = Arc::new(LoggingPublisher::new("powerctl-daemon"));
    let relay = Relay::new(store, publisher, settings.outbox_poll_interval, settings.outbox_retry_initial, settings.outbox_retry_max);

    let cancel = CancellationToken::new();
    engine.start(cancel.clone()).await;
    tokio::spawn(Syncer::run(syncer.clone(), cancel.clone()));
    tokio::spawn(Relay::run(relay.clone(), cancel.clone()));

    let shared = Arc::new(AppState::new(engine, syncer, relay, secrets.admin_token.clone()));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = secrets
        .daemon_addr
        .parse()
        .with_context(|| format!("invalid POWERCTL_DAEMON_ADDR: {}", secrets.daemon_addr))?;
    info!("powerctl-daemon listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.context("bind daemon address")?;
    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(cancel.clone()));

    serve.await.context("server crashed")?;
    cancel.cancel();
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining background loops");
    cancel.cancel();
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// `POWERCTL_CONFIG_PATHS` is a colon-separated list of YAML files, applied
/// in order (later files override earlier ones). Falls back to a single
/// conventional path when unset.
fn config_paths_from_env() -> Vec<String> {
    match std::env::var("POWERCTL_CONFIG_PATHS") {
        Ok(v) if !v.trim().is_empty() => v.split(':').map(str::to_string).collect(),
        _ => vec!["config/powerctl.yaml".to_string()],
    }
}

fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = ["http://localhost", "http://127.0.0.1", "http://localhost:3000", "http://127.0.0.1:3000"];
    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
