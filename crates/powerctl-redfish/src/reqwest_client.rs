use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RedfishError;
use crate::{Credential, RedfishClient};
use powerctl_types::Operation;

fn verified_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client build must not fail")
    })
}

fn insecure_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client build must not fail")
    })
}

/// `reqwest`-backed [`RedfishClient`]: a thin typed wrapper translating
/// transport/HTTP failures into [`RedfishError`] rather than surfacing a
/// bare `reqwest::Error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestRedfishClient;

impl ReqwestRedfishClient {
    pub fn new() -> Self {
        Self
    }

    fn client(insecure_skip_verify: bool) -> &'static reqwest::Client {
        if insecure_skip_verify {
            insecure_client()
        } else {
            verified_client()
        }
    }

    fn apply_auth(req: reqwest::RequestBuilder, cred: &Credential) -> reqwest::RequestBuilder {
        match (&cred.username, &cred.password) {
            (Some(u), p) => req.basic_auth(u, p.clone()),
            (None, _) => req,
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RedfishError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RedfishError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RedfishClient for ReqwestRedfishClient {
    async fn list_system_paths(
        &self,
        endpoint: &str,
        cred: &Credential,
        insecure_skip_verify: bool,
    ) -> Result<Vec<String>, RedfishError> {
        let url = format!("{}/redfish/v1/Systems", endpoint.trim_end_matches('/'));
        let req = Self::client(insecure_skip_verify).get(&url);
        let req = Self::apply_auth(req, cred);
        let resp = Self::check_status(req.send().await?).await?;
        let body: Value = resp.json().await.map_err(|e| RedfishError::Decode(e.to_string()))?;

        let members = body
            .get("Members")
            .and_then(|m| m.as_array())
            .ok_or_else(|| RedfishError::Decode("missing Members array".to_string()))?;

        let mut paths = Vec::with_capacity(members.len());
        for m in members {
            if let Some(id) = m.get("@odata.id").and_then(|v| v.as_str()) {
                paths.push(id.to_string());
            }
        }
        Ok(paths)
    }

    async fn reset_system(
        &self,
        endpoint: &str,
        path: &str,
        cred: &Credential,
        insecure_skip_verify: bool,
        operation: Operation,
    ) -> Result<(), RedfishError> {
        let url = format!(
            "{}{}/Actions/ComputerSystem.Reset",
            endpoint.trim_end_matches('/'),
            path
        );
        let req = Self::client(insecure_skip_verify)
            .post(&url)
            .json(&serde_json::json!({ "ResetType": operation.as_str() }));
        let req = Self::apply_auth(req, cred);
        Self::check_status(req.send().await?).await?;
        Ok(())
    }

    async fn get_system_power_state(
        &self,
        endpoint: &str,
        path: &str,
        cred: &Credential,
        insecure_skip_verify: bool,
    ) -> Result<String, RedfishError> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
        let req = Self::client(insecure_skip_verify).get(&url);
        let req = Self::apply_auth(req, cred);
        let resp = Self::check_status(req.send().await?).await?;
        let body: Value = resp.json().await.map_err(|e| RedfishError::Decode(e.to_string()))?;
        body.get("PowerState")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| RedfishError::Decode("missing PowerState field".to_string()))
    }
}
