// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration Types
//
// Defines the configuration schema for a partner agent node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - External agent gateway endpoint and timeouts
// - Storage backend selection
// - Credential / activity behaviour switches
// - Periodic job schedules

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::partner::ConnectionState;
use crate::domain::proof::PresentationExchangeState;
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "partner-agent/v1";
pub const KIND: &str = "AgentConfig";

/// Top-level Kubernetes-style agent configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfigManifest {
    /// API version (must be "partner-agent/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AgentConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: AgentConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigSpec {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub credentials: CredentialConfig,

    #[serde(default)]
    pub proofs: ProofConfig,

    #[serde(default)]
    pub activity: ActivityConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Admin API of the external identity agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Sent as `X-API-Key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_gateway_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            api_key: None,
            timeout: default_gateway_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::Memory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl StorageConfig {
    pub fn backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageKind::Memory => Ok(StorageBackend::InMemory),
            StorageKind::Postgres => {
                let connection_string = self
                    .database_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("storage.database_url is required for the postgres backend"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string,
                    max_connections: self.max_connections,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Mirrors the agent's `auto-respond-credential-request` flag. When false the issuer
    /// issues explicitly on every request.
    #[serde(default)]
    pub auto_respond_credential_request: bool,

    /// Prefix used when qualifying a peer's public DID.
    #[serde(default = "default_did_prefix")]
    pub did_prefix: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            auto_respond_credential_request: false,
            did_prefix: default_did_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    /// Answer a request for a presentation we proposed ourselves with the proposed material.
    #[serde(default = "default_true")]
    pub auto_present: bool,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self { auto_present: true }
    }
}

/// Which reported states open a pending task rather than a completed activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_connection_task_states")]
    pub connection_task_states: Vec<ConnectionState>,

    #[serde(default = "default_presentation_task_states")]
    pub presentation_task_states: Vec<PresentationExchangeState>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            connection_task_states: default_connection_task_states(),
            presentation_task_states: default_presentation_task_states(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobSchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl JobSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_liveness_schedule")]
    pub liveness_probe: JobSchedule,

    #[serde(default = "default_revocation_schedule")]
    pub revocation_poll: JobSchedule,

    #[serde(default = "default_stale_connection_schedule")]
    pub stale_connection_prune: JobSchedule,

    #[serde(default = "default_credential_type_schedule")]
    pub credential_type_index: JobSchedule,

    #[serde(default = "default_channel_prune_schedule")]
    pub channel_prune: JobSchedule,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            liveness_probe: default_liveness_schedule(),
            revocation_poll: default_revocation_schedule(),
            stale_connection_prune: default_stale_connection_schedule(),
            credential_type_index: default_credential_type_schedule(),
            channel_prune: default_channel_prune_schedule(),
        }
    }
}

impl JobsConfig {
    pub fn all(&self) -> [(&'static str, &JobSchedule); 5] {
        [
            ("liveness_probe", &self.liveness_probe),
            ("revocation_poll", &self.revocation_poll),
            ("stale_connection_prune", &self.stale_connection_prune),
            ("credential_type_index", &self.credential_type_index),
            ("channel_prune", &self.channel_prune),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_gateway_url() -> String {
    "http://localhost:8031".to_string()
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_connections() -> u32 {
    5
}

fn default_did_prefix() -> String {
    "did:sov:".to_string()
}

fn default_connection_task_states() -> Vec<ConnectionState> {
    vec![ConnectionState::Request]
}

fn default_presentation_task_states() -> Vec<PresentationExchangeState> {
    vec![PresentationExchangeState::RequestReceived]
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_liveness_schedule() -> JobSchedule {
    JobSchedule::every(Duration::from_secs(60))
}

fn default_revocation_schedule() -> JobSchedule {
    JobSchedule::every(Duration::from_secs(5 * 60))
}

fn default_stale_connection_schedule() -> JobSchedule {
    JobSchedule::every(Duration::from_secs(30 * 60))
}

fn default_credential_type_schedule() -> JobSchedule {
    JobSchedule::every(Duration::from_secs(24 * 60 * 60))
}

fn default_channel_prune_schedule() -> JobSchedule {
    JobSchedule::every(Duration::from_secs(60 * 60))
}

fn default_bus_capacity() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "partner-agent".to_string(),
                labels: None,
            },
            spec: AgentConfigSpec::default(),
        }
    }
}

impl AgentConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using standard precedence
    ///
    /// Search order:
    /// 1. PARTNER_AGENT_CONFIG_PATH environment variable
    /// 2. ./partner-agent.yaml (working directory)
    /// 3. ~/.partner-agent/config.yaml (user home)
    /// 4. /etc/partner-agent/config.yaml (system, Unix only)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PARTNER_AGENT_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd_config = PathBuf::from("./partner-agent.yaml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".partner-agent").join("config.yaml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/partner-agent/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", path);
                Self::from_yaml_file(path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides so container deployments need no file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PARTNER_AGENT_GATEWAY_URL") {
            tracing::info!("Environment override: PARTNER_AGENT_GATEWAY_URL={}", url);
            self.spec.gateway.url = url;
        }
        if let Ok(key) = std::env::var("PARTNER_AGENT_GATEWAY_API_KEY") {
            tracing::info!("Environment override: PARTNER_AGENT_GATEWAY_API_KEY=***");
            self.spec.gateway.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("PARTNER_AGENT_DATABASE_URL") {
            tracing::info!("Environment override: PARTNER_AGENT_DATABASE_URL set, using postgres");
            self.spec.storage.backend = StorageKind::Postgres;
            self.spec.storage.database_url = Some(url);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let gateway_url = &self.spec.gateway.url;
        if gateway_url.is_empty() {
            anyhow::bail!("spec.gateway.url cannot be empty");
        }
        match url::Url::parse(gateway_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => anyhow::bail!(
                "spec.gateway.url must use http or https, got '{}'",
                parsed.scheme()
            ),
            Err(e) => anyhow::bail!("spec.gateway.url is not a valid url: {}", e),
        }

        for (name, schedule) in self.spec.jobs.all() {
            if schedule.enabled && schedule.interval.is_zero() {
                anyhow::bail!("spec.jobs.{}.interval must be greater than zero", name);
            }
        }

        if self.spec.event_bus.capacity == 0 {
            anyhow::bail!("spec.event_bus.capacity must be greater than zero");
        }

        if self.spec.storage.backend == StorageKind::Postgres && self.spec.storage.database_url.is_none() {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_manifest() {
        let manifest = AgentConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.jobs.liveness_probe.interval, Duration::from_secs(60));
        assert_eq!(manifest.spec.jobs.revocation_poll.interval, Duration::from_secs(300));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: partner-agent/v1
kind: AgentConfig
metadata:
  name: test-agent
spec:
  gateway:
    url: http://agent.internal:8031
    timeout: 3s
  jobs:
    stale_connection_prune:
      enabled: false
      interval: 0s
"#;
        let manifest = AgentConfigManifest::from_yaml_str(yaml).unwrap();

        assert_eq!(manifest.spec.gateway.url, "http://agent.internal:8031");
        assert_eq!(manifest.spec.gateway.timeout, Duration::from_secs(3));
        assert!(!manifest.spec.jobs.stale_connection_prune.enabled);
        assert_eq!(manifest.spec.credentials.did_prefix, "did:sov:");
        assert_eq!(
            manifest.spec.activity.connection_task_states,
            vec![ConnectionState::Request]
        );
    }

    #[test]
    fn test_validation() {
        let mut manifest = AgentConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.gateway.url = "ftp://agent".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.gateway.url = "http://agent:8031".to_string();

        manifest.spec.jobs.revocation_poll.interval = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.jobs.revocation_poll.enabled = false;
        assert!(manifest.validate().is_ok());

        manifest.spec.storage.backend = StorageKind::Postgres;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "apiVersion: partner-agent/v1\nkind: AgentConfig\nmetadata:\n  name: from-file\n"
        )
        .unwrap();

        let manifest = AgentConfigManifest::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(manifest.metadata.name, "from-file");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = AgentConfigManifest::load_or_default(Some(PathBuf::from("/nonexistent/agent.yaml")));
        assert!(result.is_err());
    }
}
