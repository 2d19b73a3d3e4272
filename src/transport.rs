//! HTTP transport
//!
//! The API clients only need "GET a URL" and "POST JSON to a URL", both
//! returning the raw body. Keeping that behind a trait lets tests count and
//! script issuer calls without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Default request timeout for the reqwest-backed transport
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError>;
}

/// [`HttpTransport`] on top of a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Wrap an existing client (custom proxies, TLS roots, ...)
    pub fn from_client(http_client: Client) -> Self {
        Self { http_client }
    }

    async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            warn!("WeChat API returned HTTP {}", status.as_u16());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        debug!("GET {}", redact(url));
        let response = self.http_client.get(url).send().await?;
        Self::read_body(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError> {
        debug!("POST {}", redact(url));
        let response = self.http_client.post(url).json(body).send().await?;
        Self::read_body(response).await
    }
}

/// Strip the query string so secrets and tokens never reach the logs
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

// =============================================================================
// Test Support
// =============================================================================
