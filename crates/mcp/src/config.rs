//! Gateway configuration.
//!
//! Loaded from a TOML file where every field has a default, so a missing
//! file or section is fine. Command-line flags and environment variables
//! override the file in the binary.

use crate::tools::STATIC_TOOL_NAMES;
use anyhow::{Context, Result};
use junction_core::{AggregatorConfig, DiscoveryMode};
use junction_sdk::DirectoryClient;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "junction.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub directory: DirectorySection,
    pub discovery: DiscoverySection,
    pub sessions: SessionsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub mode: DiscoveryMode,
    pub cache_ttl_secs: u64,
    pub server_timeout_secs: u64,
    pub directory_timeout_secs: u64,
    pub report_tools: bool,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Directory,
            cache_ttl_secs: 300,
            server_timeout_secs: 15,
            directory_timeout_secs: 20,
            report_tools: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub connect_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            call_timeout_secs: 120,
        }
    }
}

impl GatewayConfig {
    /// Read `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            mode: self.discovery.mode,
            cache_ttl: Duration::from_secs(self.discovery.cache_ttl_secs),
            server_timeout: Duration::from_secs(self.discovery.server_timeout_secs),
            directory_timeout: Duration::from_secs(self.discovery.directory_timeout_secs),
            report_tools: self.discovery.report_tools,
            reserved_tool_names: STATIC_TOOL_NAMES.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// Directory client; requests are sent once
    pub fn directory_client(&self) -> Result<DirectoryClient> {
        DirectoryClient::builder()
            .base_url(self.directory.base_url.clone())
            .maybe_api_key(self.directory.api_key.clone())
            .timeout(Duration::from_secs(self.directory.timeout_secs))
            .build()
            .with_context(|| format!("Invalid directory base URL {}", self.directory.base_url))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.connect_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.call_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(&dir.path().join("junction.toml")).unwrap();

        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.directory.base_url, "http://127.0.0.1:8080/api/");
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[directory]
api_key = "sk-file"

[discovery]
mode = "live"
report_tools = true
"#
        )
        .unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.directory.api_key.as_deref(), Some("sk-file"));
        assert_eq!(config.directory.timeout_secs, 30);

        let aggregator = config.aggregator_config();
        assert_eq!(aggregator.mode, DiscoveryMode::Live);
        assert!(aggregator.report_tools);
        assert_eq!(aggregator.cache_ttl, Duration::from_secs(300));
        assert!(aggregator.reserved_tool_names.iter().any(|name| name == "getting_started"));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_file_names_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]\nmode = \"sideways\"").unwrap();

        let err = GatewayConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_directory_client_without_key() {
        let client = GatewayConfig::default().directory_client().unwrap();
        assert!(!client.has_api_key());
        assert_eq!(client.config().timeout, Duration::from_secs(30));
    }
}
