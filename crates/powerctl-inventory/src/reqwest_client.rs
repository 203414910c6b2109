use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{map_power_state_to_inventory_state, InventoryError};
use crate::{ComponentsPage, Component, EthernetInterface, InventoryClient};

/// `reqwest`-backed [`InventoryClient`]: bearer-token auth, JSON
/// bodies, same shape as [`powerctl_redfish::ReqwestRedfishClient`] — a thin
/// typed wrapper that never leaks a raw `reqwest::Error` to callers.
pub struct ReqwestInventoryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ReqwestInventoryClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client build must not fail"),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.token)
        }
    }
}

#[async_trait]
impl InventoryClient for ReqwestInventoryClient {
    async fn list_components(
        &self,
        fields: &[&str],
        limit: i64,
        offset: i64,
        if_none_match: Option<&str>,
    ) -> Result<ComponentsPage, InventoryError> {
        let url = format!("{}/components", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .get(&url)
            .query(&[("limit", limit.to_string()), ("offset", offset.to_string())]);
        if !fields.is_empty() {
            req = req.query(&[("fields", fields.join(","))]);
        }
        if let Some(etag) = if_none_match {
            req = req.header("If-None-Match", etag);
        }
        let req = self.auth(req);
        let resp = req.send().await?;

        if resp.status().as_u16() == 304 {
            return Ok(ComponentsPage {
                etag: if_none_match.unwrap_or_default().to_string(),
                components: None,
            });
        }
        let status = resp.status();
        let etag = resp
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InventoryError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = resp.json().await.map_err(|e| InventoryError::Decode(e.to_string()))?;
        let components: Vec<Component> = serde_json::from_value(body)
            .map_err(|e| InventoryError::Decode(e.to_string()))?;
        Ok(ComponentsPage {
            etag,
            components: Some(components),
        })
    }

    async fn list_ethernet_interfaces(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EthernetInterface>, InventoryError> {
        let url = format!("{}/ethernet-interfaces", self.base_url.trim_end_matches('/'));
        let req = self
            .client
            .get(&url)
            .query(&[("limit", limit.to_string()), ("offset", offset.to_string())]);
        let req = self.auth(req);
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InventoryError::Http {
                status: status.as_u16(),
                body,
            });
        }
        resp.json().await.map_err(|e| InventoryError::Decode(e.to_string()))
    }

    async fn patch_component(&self, id: &str, power_state: &str) -> Result<(), InventoryError> {
        let state = map_power_state_to_inventory_state(power_state)?;
        let url = format!("{}/components/{}", self.base_url.trim_end_matches('/'), id);
        let req = self
            .client
            .patch(&url)
            .json(&serde_json::json!({ "state": state }));
        let req = self.auth(req);
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InventoryError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
