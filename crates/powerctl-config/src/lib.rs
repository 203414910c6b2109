//! Layered YAML configuration with deterministic canonicalization and hashing,
//! plus the env-only secrets boundary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::time::Duration;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserializes the recognized engine settings out of the merged tree, applying
    /// defaults for any key left unset.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let mut settings = EngineSettings::default();
        let partial: PartialEngineSettings =
            serde_json::from_value(self.config_json.clone()).context("decode engine settings")?;
        partial.apply_onto(&mut settings);
        settings.normalize();
        Ok(settings)
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Recognized config-tree options. Connection strings and tokens are deliberately
/// absent here; those load from environment only, via [`Secrets::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub global_concurrency: usize,
    pub per_bmc_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub transition_deadline: Duration,
    pub verification_window: Duration,
    pub verification_poll: Duration,
    pub queue_size: usize,
    pub sync_interval: Duration,
    pub startup_retry_interval: Duration,
    pub bulk_max_nodes: usize,
    pub default_credential_id: String,
    pub outbox_poll_interval: Duration,
    pub outbox_retry_initial: Duration,
    pub outbox_retry_max: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            global_concurrency: 20,
            per_bmc_concurrency: 1,
            retry_attempts: 3,
            retry_backoff_base: Duration::from_millis(250),
            retry_backoff_max: Duration::from_secs(5),
            transition_deadline: Duration::from_secs(90),
            verification_window: Duration::from_secs(90),
            verification_poll: Duration::from_secs(2),
            queue_size: 0,
            sync_interval: Duration::from_secs(5 * 60),
            startup_retry_interval: Duration::from_secs(1),
            bulk_max_nodes: 20,
            default_credential_id: String::new(),
            outbox_poll_interval: Duration::from_secs(2),
            outbox_retry_initial: Duration::from_millis(500),
            outbox_retry_max: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    /// Applies the derived defaults that depend on other fields:
    /// `queue_size == 0` means `4 * global_concurrency`; a backoff max below the base
    /// is raised to the base.
    pub fn normalize(&mut self) {
        if self.queue_size == 0 {
            self.queue_size = (4 * self.global_concurrency).max(1);
        }
        if self.retry_backoff_max < self.retry_backoff_base {
            self.retry_backoff_max = self.retry_backoff_base;
        }
        if self.verification_poll > self.verification_window {
            self.verification_poll = self.verification_window;
        }
        if self.global_concurrency == 0 {
            self.global_concurrency = 1;
        }
    }
}

/// Mirrors [`EngineSettings`] but with every field optional, so a config file can
/// specify a subset of keys and leave the rest defaulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PartialEngineSettings {
    global_concurrency: Option<usize>,
    per_bmc_concurrency: Option<usize>,
    retry_attempts: Option<u32>,
    retry_backoff_base_ms: Option<u64>,
    retry_backoff_max_ms: Option<u64>,
    transition_deadline_secs: Option<u64>,
    verification_window_secs: Option<u64>,
    verification_poll_secs: Option<u64>,
    queue_size: Option<usize>,
    sync_interval_secs: Option<u64>,
    startup_retry_interval_secs: Option<u64>,
    bulk_max_nodes: Option<usize>,
    default_credential_id: Option<String>,
    outbox_poll_interval_secs: Option<u64>,
    outbox_retry_initial_ms: Option<u64>,
    outbox_retry_max_secs: Option<u64>,
}

impl PartialEngineSettings {
    fn apply_onto(self, out: &mut EngineSettings) {
        if let Some(v) = self.global_concurrency {
            out.global_concurrency = v;
        }
        if let Some(v) = self.per_bmc_concurrency {
            out.per_bmc_concurrency = v;
        }
        if let Some(v) = self.retry_attempts {
            out.retry_attempts = v;
        }
        if let Some(v) = self.retry_backoff_base_ms {
            out.retry_backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = self.retry_backoff_max_ms {
            out.retry_backoff_max = Duration::from_millis(v);
        }
        if let Some(v) = self.transition_deadline_secs {
            out.transition_deadline = Duration::from_secs(v);
        }
        if let Some(v) = self.verification_window_secs {
            out.verification_window = Duration::from_secs(v);
        }
        if let Some(v) = self.verification_poll_secs {
            out.verification_poll = Duration::from_secs(v);
        }
        if let Some(v) = self.queue_size {
            out.queue_size = v;
        }
        if let Some(v) = self.sync_interval_secs {
            out.sync_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.startup_retry_interval_secs {
            out.startup_retry_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.bulk_max_nodes {
            out.bulk_max_nodes = v;
        }
        if let Some(v) = self.default_credential_id {
            out.default_credential_id = v;
        }
        if let Some(v) = self.outbox_poll_interval_secs {
            out.outbox_poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.outbox_retry_initial_ms {
            out.outbox_retry_initial = Duration::from_millis(v);
        }
        if let Some(v) = self.outbox_retry_max_secs {
            out.outbox_retry_max = Duration::from_secs(v);
        }
    }
}

/// Connection strings and bearer tokens never live in the YAML tree; they load
/// straight from the process environment.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub database_url: String,
    pub inventory_base_url: String,
    pub inventory_token: String,
    pub daemon_addr: String,
    pub admin_token: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("POWERCTL_DATABASE_URL")
                .context("POWERCTL_DATABASE_URL not set")?,
            inventory_base_url: std::env::var("POWERCTL_INVENTORY_BASE_URL")
                .context("POWERCTL_INVENTORY_BASE_URL not set")?,
            inventory_token: std::env::var("POWERCTL_INVENTORY_TOKEN").unwrap_or_default(),
            daemon_addr: std::env::var("POWERCTL_DAEMON_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8899".to_string()),
            admin_token: std::env::var("POWERCTL_ADMIN_TOKEN").unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overlays_later_files() {
        let mut base = serde_json::json!({"global_concurrency": 20, "nested": {"a": 1, "b": 2}});
        let overlay = serde_json::json!({"global_concurrency": 5, "nested": {"b": 99}});
        deep_merge(&mut base, overlay);
        assert_eq!(base["global_concurrency"], 5);
        assert_eq!(base["nested"]["a"], 1);
        assert_eq!(base["nested"]["b"], 99);
    }

    #[test]
    fn canonical_json_is_key_sorted() {
        let v = serde_json::json!({"b": 1, "a": 2});
        let s = canonicalize_json(&v);
        assert_eq!(s, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn queue_size_defaults_to_four_times_global() {
        let mut s = EngineSettings {
            global_concurrency: 7,
            queue_size: 0,
            ..EngineSettings::default()
        };
        s.normalize();
        assert_eq!(s.queue_size, 28);
    }

    #[test]
    fn backoff_max_below_base_is_raised() {
        let mut s = EngineSettings {
            retry_backoff_base: Duration::from_millis(250),
            retry_backoff_max: Duration::from_millis(10),
            ..EngineSettings::default()
        };
        s.normalize();
        assert_eq!(s.retry_backoff_max, Duration::from_millis(250));
    }

    #[test]
    fn partial_settings_only_override_specified_keys() {
        let mut settings = EngineSettings::default();
        let partial = PartialEngineSettings {
            retry_attempts: Some(9),
            ..Default::default()
        };
        partial.apply_onto(&mut settings);
        assert_eq!(settings.retry_attempts, 9);
        assert_eq!(settings.global_concurrency, 20);
    }
}
