//! Periodic + on-demand topology reconciliation loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};

use powerctl_db::{ReplaceCounts, Store};
use powerctl_inventory::InventoryClient;

use crate::derive::{derive_desired_topology, fingerprint_interfaces, merge_with_prior_endpoints};

const COMPONENT_FIELDS: &[&str] = &["id", "type", "parent_id"];
const PAGE_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct SyncerStatus {
    pub ready: bool,
    pub last_attempt: Option<chrono::DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_counts: Option<ReplaceCounts>,
    pub success_count: u64,
    pub failure_count: u64,
}

struct CachedSnapshot {
    component_etag: Option<String>,
    interface_fingerprint: Option<String>,
    endpoints: BTreeMap<String, powerctl_types::BMCEndpoint>,
}

impl Default for CachedSnapshot {
    fn default() -> Self {
        Self {
            component_etag: None,
            interface_fingerprint: None,
            endpoints: BTreeMap::new(),
        }
    }
}

/// Periodic reconciler feeding the Engine with node -> BMC -> endpoint
/// mappings derived from the inventory service. Concurrent runs
/// (the periodic tick and an on-demand trigger racing) are serialized by
/// `run_mutex`; the on-demand path is a rendezvous channel so the caller
/// observes the triggered run's own result, not a stale prior one.
pub struct Syncer {
    inventory: Arc<dyn InventoryClient>,
    store: Arc<dyn Store>,
    interval: Duration,
    startup_retry_interval: Duration,
    default_credential_id: String,
    status: Arc<RwLock<SyncerStatus>>,
    cached: Mutex<CachedSnapshot>,
    run_mutex: Mutex<()>,
    trigger_tx: mpsc::Sender<oneshot::Sender<Result<(), String>>>,
    trigger_rx: Mutex<Option<mpsc::Receiver<oneshot::Sender<Result<(), String>>>>>,
}

impl Syncer {
    pub fn new(
        inventory: Arc<dyn InventoryClient>,
        store: Arc<dyn Store>,
        interval: Duration,
        startup_retry_interval: Duration,
        default_credential_id: impl Into<String>,
    ) -> Arc<Self> {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        Arc::new(Self {
            inventory,
            store,
            interval,
            startup_retry_interval,
            default_credential_id: default_credential_id.into(),
            status: Arc::new(RwLock::new(SyncerStatus::default())),
            cached: Mutex::new(CachedSnapshot::default()),
            run_mutex: Mutex::new(()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        })
    }

    pub async fn status(&self) -> SyncerStatus {
        self.status.read().await.clone()
    }

    /// Triggers an out-of-band cycle and awaits its own result.
    pub async fn trigger_once(&self) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        self.trigger_tx
            .send(tx)
            .await
            .map_err(|_| "syncer loop is not running".to_string())?;
        rx.await.map_err(|_| "syncer loop dropped the reply".to_string())?
    }

    /// Runs the periodic + on-demand loop until `cancel` fires. Intended to
    /// be spawned once by the daemon's process-level context.
    pub async fn run(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        let mut rx = match self.trigger_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("Syncer::run called more than once; ignoring");
                return;
            }
        };

        loop {
            let wait = if self.status.read().await.ready {
                self.interval
            } else {
                self.startup_retry_interval
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("topology syncer shutting down");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    let _ = self.run_cycle().await;
                }
                Some(reply) = rx.recv() => {
                    let result = self.run_cycle().await;
                    let _ = reply.send(result);
                }
            }
        }
    }

    async fn run_cycle(&self) -> Result<(), String> {
        let _guard = self.run_mutex.lock().await;
        let attempt_at = Utc::now();
        {
            let mut st = self.status.write().await;
            st.last_attempt = Some(attempt_at);
        }

        match self.do_cycle(attempt_at).await {
            Ok(counts) => {
                let mut st = self.status.write().await;
                st.ready = true;
                st.last_error = None;
                st.last_counts = counts;
                st.success_count += 1;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "topology sync cycle failed");
                let mut st = self.status.write().await;
                st.last_error = Some(e.clone());
                st.failure_count += 1;
                Err(e)
            }
        }
    }

    async fn do_cycle(&self, synced_at: chrono::DateTime<Utc>) -> Result<Option<ReplaceCounts>, String> {
        let mut cached = self.cached.lock().await;

        let components_page = self
            .inventory
            .list_components(COMPONENT_FIELDS, PAGE_LIMIT, 0, cached.component_etag.as_deref())
            .await
            .map_err(|e| e.to_string())?;

        let interfaces = self
            .inventory
            .list_ethernet_interfaces(PAGE_LIMIT, 0)
            .await
            .map_err(|e| e.to_string())?;
        let interface_fingerprint = fingerprint_interfaces(&interfaces);

        let components_unchanged = components_page.components.is_none();
        let interfaces_unchanged = cached
            .interface_fingerprint
            .as_deref()
            .map(|f| f == interface_fingerprint)
            .unwrap_or(false);

        if components_unchanged && interfaces_unchanged {
            info!("topology sync cycle: no-op (no drift detected)");
            return Ok(None);
        }

        let components = match components_page.components {
            Some(c) => c,
            None => {
                // Conditional fetch reported unchanged but interfaces drifted;
                // re-fetch unconditionally to get the full component list.
                self.inventory
                    .list_components(COMPONENT_FIELDS, PAGE_LIMIT, 0, None)
                    .await
                    .map_err(|e| e.to_string())?
                    .components
                    .unwrap_or_default()
            }
        };

        let derived = derive_desired_topology(&components, &interfaces, synced_at);
        let merged_endpoints =
            merge_with_prior_endpoints(derived.endpoints, &cached.endpoints, &self.default_credential_id);

        let counts = self
            .store
            .replace_topology_mappings(merged_endpoints.clone(), derived.links, synced_at)
            .await
            .map_err(|e| e.to_string())?;

        cached.component_etag = Some(components_page.etag);
        cached.interface_fingerprint = Some(interface_fingerprint);
        cached.endpoints = merged_endpoints.into_iter().map(|e| (e.bmc_id.clone(), e)).collect();

        info!(
            upserted_endpoints = counts.upserted_endpoints,
            deleted_endpoints = counts.deleted_endpoints,
            upserted_links = counts.upserted_links,
            deleted_links = counts.deleted_links,
            "topology sync cycle complete"
        );
        Ok(Some(counts))
    }
}
