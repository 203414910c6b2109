//! Redfish client contract consumed by the Executor and Verifier.
//!
//! `RedfishClient` is an object-safe capability trait, not a concrete
//! `reqwest` type, so the Executor can be tested against a fake and the
//! real implementation stays swappable.

pub mod error;
pub mod reqwest_client;

pub use error::RedfishError;
pub use reqwest_client::ReqwestRedfishClient;

use async_trait::async_trait;
use powerctl_types::Operation;

/// Credential material resolved for one BMC. `password` is `None` for
/// unauthenticated BMCs.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[async_trait]
pub trait RedfishClient: Send + Sync {
    async fn list_system_paths(
        &self,
        endpoint: &str,
        cred: &Credential,
        insecure_skip_verify: bool,
    ) -> Result<Vec<String>, RedfishError>;

    async fn reset_system(
        &self,
        endpoint: &str,
        path: &str,
        cred: &Credential,
        insecure_skip_verify: bool,
        operation: Operation,
    ) -> Result<(), RedfishError>;

    async fn get_system_power_state(
        &self,
        endpoint: &str,
        path: &str,
        cred: &Credential,
        insecure_skip_verify: bool,
    ) -> Result<String, RedfishError>;
}

/// Picks the system path to act on, preferring one whose trailing segment
/// matches `node_id`; else the lexicographically first.
pub fn select_system_path(paths: &[String], node_id: &str) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    if let Some(exact) = paths
        .iter()
        .find(|p| p.rsplit('/').next().map(|seg| seg == node_id).unwrap_or(false))
    {
        return Some(exact.clone());
    }
    paths.iter().min().cloned()
}

/// Resolves a `credential_id` into the concrete secret material, reading
/// from environment variables only (secrets boundary):
/// `POWERCTL_CRED_{ID}_USER` / `POWERCTL_CRED_{ID}_PASS`. Empty
/// `credential_id` resolves to an empty (unauthenticated) credential.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, credential_id: &str) -> Credential;
}

#[derive(Debug, Clone, Default)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, credential_id: &str) -> Credential {
        if credential_id.trim().is_empty() {
            return Credential::default();
        }
        let key = credential_id.to_uppercase().replace(['-', ' '], "_");
        Credential {
            username: std::env::var(format!("POWERCTL_CRED_{key}_USER")).ok(),
            password: std::env::var(format!("POWERCTL_CRED_{key}_PASS")).ok(),
        }
    }
}
