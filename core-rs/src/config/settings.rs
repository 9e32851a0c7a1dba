/**
 * settings.rs
 * Parser for kvis.yaml files
 *
 * Format:
 * ```yaml
 * apiVersion: kvis/v1
 * server:
 *   host: 10.0.0.1
 *   port: 443
 *   scheme: https
 *   kubeApiVersion: v1beta1
 *   acceptInvalidCerts: true
 *   credentialsFile: ~/.kubernetes_auth
 * scheduler:
 *   immediateBypassThreshold: 5
 *   requestTimeoutSecs: 30
 * ports:
 *   numMinions: 3
 *   basePort: 1024
 * ```
 *
 * Only `apiVersion`, `server.host` and `ports.numMinions` are required.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::credentials::expand_home;
use crate::connection::{SchedulerConfig, DEFAULT_REQUEST_TIMEOUT, IMMEDIATE_BYPASS_THRESHOLD};
use crate::errors::KvisError;
use crate::port::{PortAllocator, DEFAULT_BASE_PORT};

/// Expected value of `apiVersion`
pub const CONFIG_API_VERSION: &str = "kvis/v1";

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "kvis.yaml";

/// kvis.yaml file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KvisConfig {
    pub api_version: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    pub ports: PortSettings,
}

/// Control-plane endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_kube_api_version")]
    pub kube_api_version: String,
    /// Skip certificate verification (self-signed cluster masters)
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

/// Connection scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    #[serde(default = "default_bypass_threshold")]
    pub immediate_bypass_threshold: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            immediate_bypass_threshold: default_bypass_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Port allocator sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortSettings {
    /// Cluster node count, the per-port replica ceiling
    pub num_minions: u32,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_server_port() -> u16 {
    443
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_kube_api_version() -> String {
    "v1beta1".to_string()
}

fn default_bypass_threshold() -> usize {
    IMMEDIATE_BYPASS_THRESHOLD
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

impl KvisConfig {
    /// Minimal configuration for `host` with `num_minions` nodes
    pub fn new(host: impl Into<String>, num_minions: u32) -> Self {
        Self {
            api_version: CONFIG_API_VERSION.to_string(),
            server: ServerConfig {
                host: host.into(),
                port: default_server_port(),
                scheme: default_scheme(),
                kube_api_version: default_kube_api_version(),
                accept_invalid_certs: false,
                credentials_file: None,
            },
            scheduler: SchedulerSettings::default(),
            ports: PortSettings {
                num_minions,
                base_port: default_base_port(),
            },
        }
    }

    /// Load kvis.yaml from specified path
    ///
    /// # Example
    /// ```no_run
    /// use kvis_core::config::KvisConfig;
    ///
    /// let config = KvisConfig::load("kvis.yaml").unwrap();
    /// println!("{}", config.server.host);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KvisError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(KvisError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| KvisError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self, KvisError> {
        let config: KvisConfig = serde_yaml::from_str(content)
            .map_err(|e| KvisError::Config(format!("Invalid kvis.yaml: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save as YAML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), KvisError> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate kvis.yaml structure
    ///
    /// Ensures:
    /// - apiVersion is "kvis/v1"
    /// - server host and API version are non-empty
    /// - numMinions is at least 1
    /// - request timeout is at least one second
    pub fn validate(&self) -> Result<(), KvisError> {
        if self.api_version != CONFIG_API_VERSION {
            return Err(KvisError::ValidationError(format!(
                "Invalid apiVersion: expected '{}', got '{}'",
                CONFIG_API_VERSION, self.api_version
            )));
        }

        if self.server.host.trim().is_empty() {
            return Err(KvisError::ValidationError(
                "server.host cannot be empty".to_string(),
            ));
        }

        if self.server.kube_api_version.trim().is_empty() {
            return Err(KvisError::ValidationError(
                "server.kubeApiVersion cannot be empty".to_string(),
            ));
        }

        if self.ports.num_minions == 0 {
            return Err(KvisError::ValidationError(
                "ports.numMinions must be at least 1".to_string(),
            ));
        }

        if self.scheduler.request_timeout_secs == 0 {
            return Err(KvisError::ValidationError(
                "scheduler.requestTimeoutSecs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Scheduler settings in the form the scheduler takes
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            bypass_threshold: self.scheduler.immediate_bypass_threshold,
            request_timeout: Duration::from_secs(self.scheduler.request_timeout_secs),
            accept_invalid_certs: self.server.accept_invalid_certs,
        }
    }

    /// A fresh allocator sized for this cluster
    pub fn port_allocator(&self) -> Result<PortAllocator, KvisError> {
        PortAllocator::with_base_port(self.ports.num_minions, self.ports.base_port)
    }

    /// Credentials file path with `~` expanded
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.server.credentials_file.as_deref().map(expand_home)
    }
}
