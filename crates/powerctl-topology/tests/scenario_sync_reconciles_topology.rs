use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use powerctl_db::InMemoryStore;
use powerctl_inventory::{Component, ComponentsPage, EthernetInterface, InventoryClient, InventoryError};
use powerctl_topology::Syncer;

struct FakeInventory {
    components: Vec<Component>,
    interfaces: Vec<EthernetInterface>,
    calls: Mutex<u32>,
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn list_components(
        &self,
        _fields: &[&str],
        _limit: i64,
        _offset: i64,
        _if_none_match: Option<&str>,
    ) -> Result<ComponentsPage, InventoryError> {
        *self.calls.lock().await += 1;
        Ok(ComponentsPage {
            etag: "etag-1".to_string(),
            components: Some(self.components.clone()),
        })
    }

    async fn list_ethernet_interfaces(
        &self,
        _limit: i64,
        _offset: i64,
    ) -> Result<Vec<EthernetInterface>, InventoryError> {
        Ok(self.interfaces.clone())
    }

    async fn patch_component(&self, _id: &str, _power_state: &str) -> Result<(), InventoryError> {
        Ok(())
    }
}

#[tokio::test]
async fn trigger_once_reconciles_and_resolves_node_mapping() {
    let inventory = Arc::new(FakeInventory {
        components: vec![
            Component { id: "bmc-1".into(), component_type: "BMC".into(), parent_id: None },
            Component { id: "node-1".into(), component_type: "Node".into(), parent_id: Some("bmc-1".into()) },
        ],
        interfaces: vec![EthernetInterface {
            component_id: "bmc-1".into(),
            ip_addrs: vec!["10.0.0.9".into()],
        }],
        calls: Mutex::new(0),
    });
    let store: Arc<dyn powerctl_db::Store> = Arc::new(InMemoryStore::new("powerctl-test"));

    let syncer = Syncer::new(inventory, store.clone(), Duration::from_secs(60), Duration::from_millis(1), "");
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn({
        let syncer = syncer.clone();
        let cancel = cancel.clone();
        async move { syncer.run(cancel).await }
    });

    syncer.trigger_once().await.unwrap();

    let resolved = store.resolve_node_mappings(&["node-1".to_string()]).await.unwrap();
    assert_eq!(resolved.resolved.len(), 1);
    assert_eq!(resolved.resolved[0].endpoint, "https://10.0.0.9");
    assert!(resolved.missing.is_empty());

    let status = syncer.status().await;
    assert!(status.ready);
    assert_eq!(status.success_count, 1);

    cancel.cancel();
    handle.await.unwrap();
}
