//! Delivery of serialized envelopes to the remote collector
//!
//! The delivery worker only needs "send one envelope, tell me whether it
//! arrived". [`Transport`] is that capability; [`HttpTransport`] implements it
//! against the collector's HTTP upload endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};

/// Form field carrying the envelope
pub const EVENT_FIELD: &str = "event";

/// User agent sent with every upload
pub const USER_AGENT: &str = concat!("telebuf-rust/", env!("CARGO_PKG_VERSION"));

/// Sends one serialized envelope to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Ok(())` only when the collector accepted the envelope
    async fn send(&self, envelope: &str) -> Result<()>;
}

/// HTTP transport for the collector upload endpoint
///
/// Each envelope is posted as `application/x-www-form-urlencoded` with a
/// single `event` field. Any 2xx response counts as delivered.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let url = config.endpoint_url()?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, url })
    }

    /// Endpoint envelopes are posted to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: &str) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .form(&[(EVENT_FIELD, envelope)])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Transport(format!(
            "collector error ({}): {}",
            status, error_text
        )))
    }
}
