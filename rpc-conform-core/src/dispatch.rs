//! Request dispatch over HTTP
//!
//! Posts an opaque JSON-RPC payload to a server and hands back the decoded
//! response body. A transport failure means the environment is unusable, so
//! callers treat it as fatal unless configured otherwise.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default transport timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the transport layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Endpoint {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Response from {url} is not valid JSON: {source}")]
    Undecodable {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Sends one request payload and returns the raw response payload
pub trait Dispatcher {
    fn send(
        &self,
        url: &str,
        request: &Value,
    ) -> impl Future<Output = Result<Value, TransportError>>;
}

/// JSON-RPC over HTTP POST
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    /// Create a dispatcher whose every call is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self { client })
    }
}

impl Dispatcher for HttpDispatcher {
    async fn send(&self, url: &str, request: &Value) -> Result<Value, TransportError> {
        debug!("POST {} {}", url, request);

        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|source| TransportError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        // JSON-RPC errors travel in the body, so any status with JSON is a response
        let status = resp.status();
        if !status.is_success() {
            debug!("{} answered HTTP {}", url, status);
        }

        let body = resp.text().await.map_err(|source| TransportError::Body {
            url: url.to_string(),
            source,
        })?;

        serde_json::from_str(body.trim()).map_err(|source| TransportError::Undecodable {
            url: url.to_string(),
            source,
        })
    }
}
