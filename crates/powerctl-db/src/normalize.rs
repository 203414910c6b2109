//! Pure normalization for [`crate::Store::replace_topology_mappings`] inputs:
//! trim identifiers, dedupe by primary key keeping the last occurrence, sort for
//! deterministic ordering, default `source` to a stable tag when empty. No I/O,
//! so both the Postgres and in-memory stores share one tested implementation.

use chrono::{DateTime, Utc};
use powerctl_types::{BMCEndpoint, NodeBMCLink};
use std::collections::BTreeMap;

pub const DEFAULT_SOURCE: &str = "inventory-sync";

pub fn normalize_endpoints(input: Vec<BMCEndpoint>, synced_at: DateTime<Utc>) -> Vec<BMCEndpoint> {
    let mut by_id: BTreeMap<String, BMCEndpoint> = BTreeMap::new();
    for mut e in input {
        e.bmc_id = e.bmc_id.trim().to_string();
        if e.bmc_id.is_empty() {
            continue;
        }
        e.endpoint = e.endpoint.trim().to_string();
        e.credential_id = e.credential_id.trim().to_string();
        if e.source.trim().is_empty() {
            e.source = DEFAULT_SOURCE.to_string();
        } else {
            e.source = e.source.trim().to_string();
        }
        e.last_synced_at = synced_at;
        by_id.insert(e.bmc_id.clone(), e);
    }
    by_id.into_values().collect()
}

pub fn normalize_links(input: Vec<NodeBMCLink>, synced_at: DateTime<Utc>) -> Vec<NodeBMCLink> {
    let mut by_id: BTreeMap<String, NodeBMCLink> = BTreeMap::new();
    for mut l in input {
        l.node_id = l.node_id.trim().to_string();
        if l.node_id.is_empty() {
            continue;
        }
        l.bmc_id = l.bmc_id.trim().to_string();
        if l.source.trim().is_empty() {
            l.source = DEFAULT_SOURCE.to_string();
        } else {
            l.source = l.source.trim().to_string();
        }
        l.last_synced_at = synced_at;
        by_id.insert(l.node_id.clone(), l);
    }
    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str, endpoint: &str) -> BMCEndpoint {
        let now = Utc::now();
        BMCEndpoint {
            bmc_id: id.to_string(),
            endpoint: endpoint.to_string(),
            credential_id: String::new(),
            insecure_skip_verify: false,
            source: String::new(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn dedupes_keeping_last_occurrence() {
        let now = Utc::now();
        let input = vec![
            endpoint(" bmc-1 ", "https://a"),
            endpoint("bmc-1", "https://b"),
        ];
        let out = normalize_endpoints(input, now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].endpoint, "https://b");
    }

    #[test]
    fn empty_source_defaults() {
        let now = Utc::now();
        let out = normalize_endpoints(vec![endpoint("bmc-1", "https://a")], now);
        assert_eq!(out[0].source, DEFAULT_SOURCE);
    }

    #[test]
    fn blank_bmc_id_is_dropped() {
        let now = Utc::now();
        let out = normalize_endpoints(vec![endpoint("   ", "https://a")], now);
        assert!(out.is_empty());
    }

    #[test]
    fn sorted_by_key() {
        let now = Utc::now();
        let out = normalize_endpoints(
            vec![endpoint("bmc-2", "https://b"), endpoint("bmc-1", "https://a")],
            now,
        );
        assert_eq!(out[0].bmc_id, "bmc-1");
        assert_eq!(out[1].bmc_id, "bmc-2");
    }
}
