use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::transfer::dispatcher::DispatcherConfig;
use crate::transfer::events::EventsConfig;
use crate::transfer::gateway::ProtocolConfig;
use crate::transfer::lease::LeaseConfig;
use crate::transfer::retry::RetryConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Per-cycle dispatch records (target `DISPATCH`)
    pub enable_tracing: bool,
    /// Prefix for dispatcher worker ids
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

fn default_node_id() -> String {
    "node".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "transfer_coordinator.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            enable_tracing: false,
            node_id: default_node_id(),
            postgres_url: None,
            api: ApiConfig::default(),
            dispatcher: DispatcherConfig::default(),
            lease: LeaseConfig::default(),
            retry: RetryConfig::default(),
            protocol: ProtocolConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.lease.ttl_ms > 0, "lease.ttl_ms must be positive");
        anyhow::ensure!(
            self.dispatcher.batch_size > 0,
            "dispatcher.batch_size must be positive"
        );
        anyhow::ensure!(
            self.retry.base_delay_ms <= self.retry.max_delay_ms,
            "retry.base_delay_ms must not exceed retry.max_delay_ms"
        );
        // The lease must outlive the slowest outbound call
        anyhow::ensure!(
            self.lease.ttl_ms > self.protocol.timeout_ms,
            "lease.ttl_ms must exceed protocol.timeout_ms"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: "debug"
log_dir: "./logs"
log_file: "test.log"
use_json: false
rotation: "never"
enable_tracing: true
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.node_id, "node");
        assert!(config.postgres_url.is_none());
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.dispatcher.batch_size, 100);
        assert_eq!(config.lease.ttl_ms, 60_000);
    }

    #[test]
    fn test_sections_override() {
        let yaml = format!(
            "{}\nnode_id: \"edge-1\"\ndispatcher:\n  workers: 4\nretry:\n  max_attempts: 7\n",
            MINIMAL
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.node_id, "edge-1");
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.dispatcher.poll_interval_ms, 500);
        assert_eq!(config.retry.max_attempts, 7);
    }

    #[test]
    fn test_rejects_lease_shorter_than_gateway_timeout() {
        let yaml = format!("{}\nlease:\n  ttl_ms: 1000\n", MINIMAL);
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = AppConfig::load("does-not-exist").unwrap_err();
        assert!(err.to_string().contains("config/does-not-exist.yaml"));
    }

    #[test]
    fn test_checked_in_dev_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.yaml");
        let config = AppConfig::from_file(path).unwrap();
        assert!(config.dispatcher.workers > 0);
    }
}
