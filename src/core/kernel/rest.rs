use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, trace};

use crate::core::errors::{preview, TradeError, PREVIEW_LEN};

/// Blocking HTTP transport used by the JSON-RPC client and the exchange REST calls.
///
/// Implementations only move bytes: an empty body or a failed request is a
/// transport error, and interpreting the payload is left to the caller. A
/// non-2xx reply comes back as `TradeError::HttpStatus` with its body intact.
pub trait RestClient: Send + Sync {
    /// POST a JSON document to `endpoint` (relative to the configured base URL)
    /// and return the response body.
    fn post_raw(&self, endpoint: &str, body: &str) -> Result<String, TradeError>;

    /// POST and deserialize the response into `T`.
    fn post_json<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T, TradeError>
    where
        Self: Sized,
    {
        let text = self.post_raw(endpoint, &body.to_string())?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl<R: RestClient + ?Sized> RestClient for Arc<R> {
    fn post_raw(&self, endpoint: &str, body: &str) -> Result<String, TradeError> {
        (**self).post_raw(endpoint, body)
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL; endpoints are appended verbatim
    pub base_url: String,
    /// Name used in tracing spans
    pub service_name: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, service_name: String) -> Self {
        Self {
            base_url,
            service_name,
            timeout: Duration::from_secs(15),
            user_agent: concat!("pocket-trader/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> Result<ReqwestRest, TradeError> {
        let client = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| TradeError::TransportError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestRest {
            client,
            config: self.config,
        })
    }
}

/// `RestClient` over reqwest's blocking client
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    pub fn new(base_url: String, service_name: String) -> Result<Self, TradeError> {
        RestClientBuilder::new(RestClientConfig::new(base_url, service_name)).build()
    }

    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }
}

impl RestClient for ReqwestRest {
    #[instrument(skip_all, fields(service = %self.config.service_name, endpoint = %endpoint))]
    fn post_raw(&self, endpoint: &str, body: &str) -> Result<String, TradeError> {
        let response = self
            .client
            .post(self.build_url(endpoint))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .map_err(|e| TradeError::TransportError(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| TradeError::TransportError(format!("Failed to read response body: {}", e)))?;

        trace!(status = %status, body = %preview(&text, PREVIEW_LEN), "response");

        if !status.is_success() {
            return Err(TradeError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Err(TradeError::TransportError("empty response".to_string()));
        }
        Ok(text)
    }
}
