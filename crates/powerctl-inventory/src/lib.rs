//! Inventory service client contract consumed by the Topology Syncer and
//! the State Updater. Only the read shape the syncer needs and
//! the patch shape the state updater needs are modeled; the inventory
//! service's full REST surface is out of scope here.

pub mod error;
pub mod reqwest_client;

pub use error::{map_power_state_to_inventory_state, InventoryError};
pub use reqwest_client::ReqwestInventoryClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetInterface {
    pub component_id: String,
    #[serde(default)]
    pub ip_addrs: Vec<String>,
}

/// Result of a conditional components fetch: `None` when the server
/// reported no change against the supplied entity tag.
#[derive(Debug, Clone, Default)]
pub struct ComponentsPage {
    pub etag: String,
    pub components: Option<Vec<Component>>,
}

#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn list_components(
        &self,
        fields: &[&str],
        limit: i64,
        offset: i64,
        if_none_match: Option<&str>,
    ) -> Result<ComponentsPage, InventoryError>;

    async fn list_ethernet_interfaces(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EthernetInterface>, InventoryError>;

    async fn patch_component(&self, id: &str, power_state: &str) -> Result<(), InventoryError>;
}
