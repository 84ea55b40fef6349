use std::net::{SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use shared::protocol::{SSDP_MULTICAST_ADDR, SSDP_PORT};
use crate::ssdp::ScanOptions;
use crate::survey::SurveySettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ssdp: SsdpConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SsdpConfig {
    /// Destination of the M-SEARCH
    #[serde(default = "default_target")]
    pub target: SocketAddr,
    #[serde(default = "default_scan_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,
    /// Default ST; ssdp:all when unset
    #[serde(default)]
    pub search_target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Per-request timeout for root and capability documents
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Maximum number of descriptor requests in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_target() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_ADDR, SSDP_PORT))
}

fn default_scan_timeout() -> u64 {
    5
}

fn default_multicast_ttl() -> u32 {
    2
}

fn default_fetch_timeout() -> u64 {
    3
}

fn default_concurrency() -> usize {
    8
}

fn default_listen() -> String {
    "127.0.0.1:8054".to_string()
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            timeout_secs: default_scan_timeout(),
            multicast_ttl: default_multicast_ttl(),
            search_target: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Like `load`, but a missing file yields the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            target: self.ssdp.target,
            search_target: self.ssdp.search_target.clone(),
            timeout: Duration::from_secs(self.ssdp.timeout_secs),
            multicast_ttl: self.ssdp.multicast_ttl,
        }
    }

    pub fn survey_settings(&self) -> SurveySettings {
        SurveySettings {
            scan: self.scan_options(),
            fetch_timeout: Duration::from_secs(self.fetch.timeout_secs),
            concurrency: self.fetch.concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.ssdp.target, "239.255.255.250:1900".parse::<SocketAddr>().unwrap());
        assert_eq!(config.ssdp.timeout_secs, 5);
        assert_eq!(config.ssdp.multicast_ttl, 2);
        assert_eq!(config.fetch.timeout_secs, 3);
        assert_eq!(config.fetch.concurrency, 8);
        assert_eq!(config.api.listen, "127.0.0.1:8054");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [ssdp]
            timeout_secs = 2
            search_target = "urn:dslforum-org:device:InternetGatewayDevice:1"

            [fetch]
            concurrency = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.ssdp.multicast_ttl, 2);
        let settings = config.survey_settings();
        assert_eq!(settings.scan.timeout, Duration::from_secs(2));
        assert_eq!(
            settings.scan.search_target.as_deref(),
            Some("urn:dslforum-org:device:InternetGatewayDevice:1")
        );
        assert_eq!(settings.fetch_timeout, Duration::from_secs(3));
        assert_eq!(settings.concurrency, 1, "A zero pool is raised to one");
    }

    #[test]
    fn test_invalid_target_rejected() {
        assert!(Config::from_toml_str("[ssdp]\ntarget = \"not-an-address\"").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_or_default("/nonexistent/upnp-scout/scoutd.toml").unwrap();
        assert_eq!(config.ssdp.timeout_secs, 5);
        assert!(Config::load("/nonexistent/upnp-scout/scoutd.toml").is_err());
    }
}
