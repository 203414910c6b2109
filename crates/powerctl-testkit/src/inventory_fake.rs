//! Fixed-response [`InventoryClient`] fake for syncer/daemon integration
//! tests that don't need a real inventory service.

use async_trait::async_trait;
use tokio::sync::Mutex;

use powerctl_inventory::{Component, ComponentsPage, EthernetInterface, InventoryClient, InventoryError};

pub struct FakeInventoryClient {
    pub components: Vec<Component>,
    pub interfaces: Vec<EthernetInterface>,
    pub patched: Mutex<Vec<(String, String)>>,
}

impl FakeInventoryClient {
    pub fn new(components: Vec<Component>, interfaces: Vec<EthernetInterface>) -> Self {
        Self { components, interfaces, patched: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl InventoryClient for FakeInventoryClient {
    async fn list_components(
        &self,
        _fields: &[&str],
        _limit: i64,
        _offset: i64,
        _if_none_match: Option<&str>,
    ) -> Result<ComponentsPage, InventoryError> {
        Ok(ComponentsPage { etag: "etag-1".to_string(), components: Some(self.components.clone()) })
    }

    async fn list_ethernet_interfaces(&self, _limit: i64, _offset: i64) -> Result<Vec<EthernetInterface>, InventoryError> {
        Ok(self.interfaces.clone())
    }

    async fn patch_component(&self, id: &str, power_state: &str) -> Result<(), InventoryError> {
        self.patched.lock().await.push((id.to_string(), power_state.to_string()));
        Ok(())
    }
}
