//! Configuration for the ingress controller
//!
//! Defaults match a proxy running next to the controller with its admin API on
//! `localhost:2019`. Every field can be overridden from `CADDY_INGRESS_*`
//! environment variables.

use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Annotation that selects which controller owns an Ingress
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Ingress class this controller answers to
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    /// Name of the proxy server the route table is pushed to
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Base URL of the proxy admin API
    #[serde(default = "default_admin_url")]
    pub admin_url: String,

    /// Listen addresses of the managed proxy server
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,

    /// Disable the proxy's automatic HTTPS for the managed server
    #[serde(default = "default_true")]
    pub disable_automatic_https: bool,

    /// Proxy-side server timeouts
    #[serde(default)]
    pub server_timeouts: ServerTimeouts,

    /// Request header size limit of the proxy server (proxy default when unset)
    #[serde(default)]
    pub max_header_bytes: Option<u64>,

    /// Mirror sync gate
    #[serde(default)]
    pub sync: SyncConfig,

    /// Admin API push settings
    #[serde(default)]
    pub push: PushConfig,

    /// Bind address of the metrics and health endpoint
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Timeouts passed through to the proxy server (duration strings such as "30s")
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerTimeouts {
    pub read: Option<String>,
    pub read_header: Option<String>,
    pub write: Option<String>,
    pub idle: Option<String>,
}

/// How long an Ingress event may wait for the Service/Endpoints mirrors
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Poll interval in milliseconds (default: 100ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up after this many seconds (default: wait until shutdown)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Admin API request settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushConfig {
    /// Request timeout in seconds (default: 10s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl PushConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_ingress_class() -> String {
    "caddy".to_string()
}

fn default_server_name() -> String {
    "kubernetes-ingress".to_string()
}

fn default_admin_url() -> String {
    "http://localhost:2019".to_string()
}

fn default_listen() -> Vec<String> {
    vec![":80".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ingress_class: default_ingress_class(),
            server_name: default_server_name(),
            admin_url: default_admin_url(),
            listen: default_listen(),
            disable_automatic_https: default_true(),
            server_timeouts: ServerTimeouts::default(),
            max_header_bytes: None,
            sync: SyncConfig::default(),
            push: PushConfig::default(),
            metrics_addr: default_metrics_addr(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ControlError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("CADDY_INGRESS_CLASS") {
            config.ingress_class = val;
        }
        if let Some(val) = lookup("CADDY_INGRESS_SERVER_NAME") {
            config.server_name = val;
        }
        if let Some(val) = lookup("CADDY_INGRESS_ADMIN_URL") {
            config.admin_url = val;
        }
        if let Some(val) = lookup("CADDY_INGRESS_LISTEN") {
            config.listen = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = lookup("CADDY_INGRESS_DISABLE_AUTOMATIC_HTTPS") {
            config.disable_automatic_https =
                parse_var("CADDY_INGRESS_DISABLE_AUTOMATIC_HTTPS", &val)?;
        }
        if let Some(val) = lookup("CADDY_INGRESS_READ_TIMEOUT") {
            config.server_timeouts.read = Some(val);
        }
        if let Some(val) = lookup("CADDY_INGRESS_READ_HEADER_TIMEOUT") {
            config.server_timeouts.read_header = Some(val);
        }
        if let Some(val) = lookup("CADDY_INGRESS_WRITE_TIMEOUT") {
            config.server_timeouts.write = Some(val);
        }
        if let Some(val) = lookup("CADDY_INGRESS_IDLE_TIMEOUT") {
            config.server_timeouts.idle = Some(val);
        }
        if let Some(val) = lookup("CADDY_INGRESS_MAX_HEADER_BYTES") {
            config.max_header_bytes = Some(parse_var("CADDY_INGRESS_MAX_HEADER_BYTES", &val)?);
        }
        if let Some(val) = lookup("CADDY_INGRESS_SYNC_POLL_INTERVAL_MS") {
            config.sync.poll_interval_ms = parse_var("CADDY_INGRESS_SYNC_POLL_INTERVAL_MS", &val)?;
        }
        if let Some(val) = lookup("CADDY_INGRESS_SYNC_TIMEOUT_SECS") {
            config.sync.timeout_secs = Some(parse_var("CADDY_INGRESS_SYNC_TIMEOUT_SECS", &val)?);
        }
        if let Some(val) = lookup("CADDY_INGRESS_PUSH_TIMEOUT_SECS") {
            config.push.request_timeout_secs =
                parse_var("CADDY_INGRESS_PUSH_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = lookup("CADDY_INGRESS_METRICS_ADDR") {
            config.metrics_addr = val;
        }
        if let Some(val) = lookup("CADDY_INGRESS_LOG_LEVEL") {
            config.log_level = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.ingress_class.is_empty() {
            return Err(ControlError::Config("ingress class cannot be empty".into()));
        }
        if self.server_name.is_empty() || self.server_name.contains('/') {
            return Err(ControlError::Config(format!(
                "invalid server name '{}'",
                self.server_name
            )));
        }
        if !self.admin_url.starts_with("http://") && !self.admin_url.starts_with("https://") {
            return Err(ControlError::Config(format!(
                "admin URL '{}' must be http:// or https://",
                self.admin_url
            )));
        }
        if self.listen.is_empty() {
            return Err(ControlError::Config(
                "at least one listen address is required".into(),
            ));
        }
        Ok(())
    }

    /// Empty server for the configured listener, the baseline pushed at startup
    pub fn initial_server(&self) -> common::Server {
        let mut server = common::Server::new(self.listen.iter().cloned());
        server.automatic_https.disable = self.disable_automatic_https;
        server.read_timeout = self.server_timeouts.read.clone();
        server.read_header_timeout = self.server_timeouts.read_header.clone();
        server.write_timeout = self.server_timeouts.write.clone();
        server.idle_timeout = self.server_timeouts.idle.clone();
        server.max_header_bytes = self.max_header_bytes;
        server
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ControlError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ControlError::Config(format!("{}='{}': {}", key, value, e)))
}
