//! Proxy admin API client
//!
//! Pushes the route table of a named server to
//! `{admin}/config/apps/http/servers/{name}`, and the startup baseline to
//! `{admin}/config/`. Failures are logged with the response body and counted;
//! nothing here retries.

use crate::apis::metrics::record_config_push;
use crate::config::ControllerConfig;
use crate::error::PushError;
use crate::routes::RouteTable;
use async_trait::async_trait;
use common::Config;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, error, info};

/// Sink for proxy configuration
#[async_trait]
pub trait ConfigPusher: Send + Sync {
    /// Replace the server named after `table` with the table's current contents
    async fn push_server(&self, table: &RouteTable) -> Result<(), PushError>;

    /// Load a complete config, used once before any reconciliation
    async fn push_initial_config(&self, config: &Config) -> Result<(), PushError>;
}

/// [`ConfigPusher`] speaking to the proxy admin endpoint over HTTP
#[derive(Debug, Clone)]
pub struct AdminApiPusher {
    client: reqwest::Client,
    base_url: String,
}

impl AdminApiPusher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PushError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| PushError::Transport {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self, PushError> {
        Self::new(config.admin_url.clone(), config.push.request_timeout())
    }

    /// `{admin}/config/apps/http/servers/{name}`
    pub fn server_url(&self, name: &str) -> String {
        format!("{}/config/apps/http/servers/{}", self.base_url, name)
    }

    /// `{admin}/config/`
    pub fn config_url(&self) -> String {
        format!("{}/config/", self.base_url)
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), PushError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| PushError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        // Body is diagnostic only
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            debug!(url = %url, status = status.as_u16(), body = %body, "Admin API accepted config");
            Ok(())
        } else {
            Err(PushError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ConfigPusher for AdminApiPusher {
    async fn push_server(&self, table: &RouteTable) -> Result<(), PushError> {
        let server = table.name();
        let url = self.server_url(server);

        let result = match table.to_json() {
            Ok(body) => self.post(&url, body).await,
            Err(e) => Err(PushError::from(e)),
        };

        match &result {
            Ok(()) => {
                info!(server = %server, routes = table.len(), "Pushed server config");
                record_config_push(server, "success");
            }
            Err(e) => {
                error!(server = %server, url = %url, error = %e, "Failed to push server config");
                record_config_push(server, "failure");
            }
        }

        result
    }

    async fn push_initial_config(&self, config: &Config) -> Result<(), PushError> {
        let url = self.config_url();
        let body = serde_json::to_vec(config)?;

        let result = self.post(&url, body).await;
        for server in config.apps.http.servers.keys() {
            match &result {
                Ok(()) => {
                    info!(server = %server, url = %url, "Pushed initial config");
                    record_config_push(server, "success");
                }
                Err(e) => {
                    error!(server = %server, url = %url, error = %e, "Failed to push initial config");
                    record_config_push(server, "failure");
                }
            }
        }

        result
    }
}
