//! Small builders for seeding an [`InMemoryStore`] with topology mappings in
//! integration tests, without each caller re-deriving `BMCEndpoint`/
//! `NodeBMCLink` boilerplate.

use std::collections::HashMap;

use chrono::Utc;

use powerctl_db::InMemoryStore;
use powerctl_types::{BMCEndpoint, NodeBMCLink};

/// Seeds `store` so that every `(node_id, bmc_id, endpoint)` triple
/// resolves. `replace_topology_mappings` reconciles its whole desired set
/// per call (anything not included is deleted), so all mappings a test
/// needs must be passed together in one call — this helper does that for
/// the caller.
pub async fn seed_topology(store: &InMemoryStore, mappings: &[(&str, &str, &str)]) {
    let now = Utc::now();
    let mut endpoints_by_bmc: HashMap<String, BMCEndpoint> = HashMap::new();
    let mut links = Vec::new();
    for (node_id, bmc_id, endpoint) in mappings {
        endpoints_by_bmc.entry(bmc_id.to_string()).or_insert_with(|| BMCEndpoint {
            bmc_id: bmc_id.to_string(),
            endpoint: endpoint.to_string(),
            credential_id: "cred-1".to_string(),
            insecure_skip_verify: false,
            source: "test".to_string(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        });
        links.push(NodeBMCLink {
            node_id: node_id.to_string(),
            bmc_id: bmc_id.to_string(),
            source: "test".to_string(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        });
    }
    store
        .replace_topology_mappings(endpoints_by_bmc.into_values().collect(), links, now)
        .await
        .unwrap();
}
