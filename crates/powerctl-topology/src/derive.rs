//! Pure desired-state derivation: components + interfaces -> desired BMC
//! endpoints and node links, merged with the prior snapshot to preserve
//! operator-set fields. No I/O, no async, so it can be unit tested
//! exhaustively, separate from the gate/IO layer around it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use powerctl_inventory::{Component, EthernetInterface};
use powerctl_types::{BMCEndpoint, NodeBMCLink};

const NODE_TYPE: &str = "Node";
const BMC_TYPE: &str = "BMC";

/// One cycle's pure derivation output, before merge with the prior snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedTopology {
    pub endpoints: Vec<BMCEndpoint>,
    pub links: Vec<NodeBMCLink>,
}

/// Derives the desired BMC endpoints and node links from the raw inventory
/// snapshot: a BMC is tracked if a component of type `BMC`
/// matches its id, or if any `Node` component names it as `parent_id`; every
/// `Node` with a parent creates a link; each tracked BMC's endpoint is the
/// first valid HTTP(S) address derivable from its interfaces' IPs.
pub fn derive_desired_topology(
    components: &[Component],
    interfaces: &[EthernetInterface],
    synced_at: DateTime<Utc>,
) -> DerivedTopology {
    let mut tracked_bmc_ids: BTreeSet<String> = BTreeSet::new();
    let mut links = Vec::new();

    for c in components {
        if c.component_type == BMC_TYPE {
            tracked_bmc_ids.insert(c.id.clone());
        }
        if c.component_type == NODE_TYPE {
            if let Some(parent_id) = &c.parent_id {
                if !parent_id.trim().is_empty() {
                    tracked_bmc_ids.insert(parent_id.clone());
                    links.push(NodeBMCLink {
                        node_id: c.id.clone(),
                        bmc_id: parent_id.clone(),
                        source: String::new(),
                        last_synced_at: synced_at,
                        created_at: synced_at,
                        updated_at: synced_at,
                    });
                }
            }
        }
    }

    let mut ips_by_component: BTreeMap<&str, &[String]> = BTreeMap::new();
    for iface in interfaces {
        ips_by_component.insert(iface.component_id.as_str(), iface.ip_addrs.as_slice());
    }

    let mut endpoints = Vec::new();
    for bmc_id in &tracked_bmc_ids {
        let endpoint = ips_by_component
            .get(bmc_id.as_str())
            .and_then(|ips| first_valid_http_address(ips))
            .unwrap_or_default();
        endpoints.push(BMCEndpoint {
            bmc_id: bmc_id.clone(),
            endpoint,
            credential_id: String::new(),
            insecure_skip_verify: false,
            source: String::new(),
            last_synced_at: synced_at,
            created_at: synced_at,
            updated_at: synced_at,
        });
    }

    DerivedTopology { endpoints, links }
}

/// First interface IP that parses as a valid IP address, rendered as an
/// `https://` endpoint (IPv6 addresses are bracketed).
fn first_valid_http_address(ips: &[String]) -> Option<String> {
    ips.iter().find_map(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => Some(format!("https://{v4}")),
            Ok(IpAddr::V6(v6)) => Some(format!("https://[{v6}]")),
            Err(_) => None,
        }
    })
}

/// Merges freshly derived endpoints with the prior cached snapshot:
/// preserves operator-set `credential_id`/`insecure_skip_verify`
/// when the derivation would otherwise overwrite them with empty values,
/// defaulting `credential_id` to the configured fallback if still empty.
pub fn merge_with_prior_endpoints(
    derived: Vec<BMCEndpoint>,
    prior: &BTreeMap<String, BMCEndpoint>,
    default_credential_id: &str,
) -> Vec<BMCEndpoint> {
    derived
        .into_iter()
        .map(|mut e| {
            if let Some(existing) = prior.get(&e.bmc_id) {
                if e.credential_id.is_empty() {
                    e.credential_id = existing.credential_id.clone();
                }
                if !e.insecure_skip_verify {
                    e.insecure_skip_verify = existing.insecure_skip_verify;
                }
            }
            if e.credential_id.is_empty() {
                e.credential_id = default_credential_id.to_string();
            }
            e
        })
        .collect()
}

/// Stable fingerprint over a canonical encoding of the interfaces list,
/// used as the interfaces' synthetic entity tag.
pub fn fingerprint_interfaces(interfaces: &[EthernetInterface]) -> String {
    use sha2::{Digest, Sha256};

    let mut sorted: Vec<&EthernetInterface> = interfaces.iter().collect();
    sorted.sort_by(|a, b| a.component_id.cmp(&b.component_id));
    let mut canonical = String::new();
    for iface in sorted {
        canonical.push_str(&iface.component_id);
        canonical.push('|');
        let mut ips = iface.ip_addrs.clone();
        ips.sort();
        canonical.push_str(&ips.join(","));
        canonical.push(';');
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(id: &str, ty: &str, parent: Option<&str>) -> Component {
        Component {
            id: id.to_string(),
            component_type: ty.to_string(),
            parent_id: parent.map(|s| s.to_string()),
        }
    }

    fn iface(component_id: &str, ips: &[&str]) -> EthernetInterface {
        EthernetInterface {
            component_id: component_id.to_string(),
            ip_addrs: ips.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn bmc_tracked_by_explicit_component_and_by_node_parent() {
        let now = Utc::now();
        let components = vec![
            comp("bmc-1", BMC_TYPE, None),
            comp("node-1", NODE_TYPE, Some("bmc-2")),
        ];
        let out = derive_desired_topology(&components, &[], now);
        let ids: BTreeSet<String> = out.endpoints.iter().map(|e| e.bmc_id.clone()).collect();
        assert!(ids.contains("bmc-1"));
        assert!(ids.contains("bmc-2"));
        assert_eq!(out.links.len(), 1);
        assert_eq!(out.links[0].node_id, "node-1");
        assert_eq!(out.links[0].bmc_id, "bmc-2");
    }

    #[test]
    fn endpoint_picks_first_valid_ip() {
        let now = Utc::now();
        let components = vec![comp("bmc-1", BMC_TYPE, None)];
        let interfaces = vec![iface("bmc-1", &["not-an-ip", "10.0.0.5", "10.0.0.6"])];
        let out = derive_desired_topology(&components, &interfaces, now);
        assert_eq!(out.endpoints[0].endpoint, "https://10.0.0.5");
    }

    #[test]
    fn node_without_parent_creates_no_link() {
        let now = Utc::now();
        let components = vec![comp("node-1", NODE_TYPE, None)];
        let out = derive_desired_topology(&components, &[], now);
        assert!(out.links.is_empty());
        assert!(out.endpoints.is_empty());
    }

    #[test]
    fn merge_preserves_operator_fields_when_derivation_is_empty() {
        let now = Utc::now();
        let mut prior = BTreeMap::new();
        prior.insert(
            "bmc-1".to_string(),
            BMCEndpoint {
                bmc_id: "bmc-1".into(),
                endpoint: "https://old".into(),
                credential_id: "cred-1".into(),
                insecure_skip_verify: true,
                source: "inventory-sync".into(),
                last_synced_at: now,
                created_at: now,
                updated_at: now,
            },
        );
        let derived = vec![BMCEndpoint {
            bmc_id: "bmc-1".into(),
            endpoint: "https://new".into(),
            credential_id: String::new(),
            insecure_skip_verify: false,
            source: String::new(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        }];
        let merged = merge_with_prior_endpoints(derived, &prior, "");
        assert_eq!(merged[0].credential_id, "cred-1");
        assert!(merged[0].insecure_skip_verify);
        assert_eq!(merged[0].endpoint, "https://new");
    }

    #[test]
    fn merge_defaults_credential_to_fallback_when_absent() {
        let now = Utc::now();
        let derived = vec![BMCEndpoint {
            bmc_id: "bmc-1".into(),
            endpoint: "https://new".into(),
            credential_id: String::new(),
            insecure_skip_verify: false,
            source: String::new(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        }];
        let merged = merge_with_prior_endpoints(derived, &BTreeMap::new(), "default-cred");
        assert_eq!(merged[0].credential_id, "default-cred");
    }

    #[test]
    fn fingerprint_is_stable_and_order_independent() {
        let a = vec![iface("c1", &["1.1.1.1"]), iface("c2", &["2.2.2.2"])];
        let b = vec![iface("c2", &["2.2.2.2"]), iface("c1", &["1.1.1.1"])];
        assert_eq!(fingerprint_interfaces(&a), fingerprint_interfaces(&b));
    }

    #[test]
    fn fingerprint_changes_with_ip_change() {
        let a = vec![iface("c1", &["1.1.1.1"])];
        let b = vec![iface("c1", &["1.1.1.2"])];
        assert_ne!(fingerprint_interfaces(&a), fingerprint_interfaces(&b));
    }
}
