//! State Updater: pushes the verified power state back into the
//! inventory service. Failure here fails the task with a detail string that
//! begins with `"updating inventory state"` so callers can distinguish it
//! from an executor or verifier failure.

use std::sync::Arc;

use async_trait::async_trait;

use powerctl_inventory::InventoryClient;

#[async_trait]
pub trait StateUpdater: Send + Sync {
    async fn patch(&self, node_id: &str, power_state: &str) -> Result<(), String>;
}

pub struct InventoryStateUpdater {
    inventory: Arc<dyn InventoryClient>,
}

impl InventoryStateUpdater {
    pub fn new(inventory: Arc<dyn InventoryClient>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl StateUpdater for InventoryStateUpdater {
    async fn patch(&self, node_id: &str, power_state: &str) -> Result<(), String> {
        self.inventory
            .patch_component(node_id, power_state)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerctl_inventory::{ComponentsPage, EthernetInterface, InventoryError};

    struct FailingInventory;

    #[async_trait]
    impl InventoryClient for FailingInventory {
        async fn list_components(
            &self,
            _fields: &[&str],
            _limit: i64,
            _offset: i64,
            _if_none_match: Option<&str>,
        ) -> Result<ComponentsPage, InventoryError> {
            unreachable!()
        }
        async fn list_ethernet_interfaces(&self, _limit: i64, _offset: i64) -> Result<Vec<EthernetInterface>, InventoryError> {
            unreachable!()
        }
        async fn patch_component(&self, _id: &str, _power_state: &str) -> Result<(), InventoryError> {
            Err(InventoryError::Http { status: 500, body: "boom".into() })
        }
    }

    #[tokio::test]
    async fn propagates_patch_failure() {
        let updater = InventoryStateUpdater::new(Arc::new(FailingInventory));
        let err = updater.patch("node-1", "On").await.unwrap_err();
        assert!(err.contains("500"));
    }
}
