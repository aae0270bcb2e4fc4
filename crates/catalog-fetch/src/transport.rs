//! The transport seam.
//!
//! [`Transport`] performs exactly one GET and reports what happened at
//! the wire level. Retry and classification live in
//! [`crate::FetchClient`]; tests swap the transport for a scripted one.

use std::future::Future;

use reqwest::Client;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// One GET request: a URL and its query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute URL.
    pub url: String,
    /// Query parameters, appended in order.
    pub params: Vec<(String, String)>,
}

impl FetchRequest {
    /// Request without query parameters.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_owned(), value.to_string()));
        self
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

/// Wire-level failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not connect, or the connection dropped mid-exchange.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other transport failure.
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection failures and timeouts are worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}

/// Performs one GET request.
pub trait Transport: Send + Sync {
    /// Execute `request` once.
    fn get(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Production transport over a pooled [`reqwest::Client`].
///
/// The client is the only state shared between concurrent fetches and is
/// never mutated after construction.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the HTTP client from the fetch settings.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unknown`] if the TLS backend or client cannot
    /// be initialized.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, request: &FetchRequest) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(&request.url)
            .query(&request.params)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Map a `reqwest` error onto the transport error classes.
fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_level_failures_retry() {
        assert!(TransportError::Connect("reset".to_owned()).is_retryable());
        assert!(TransportError::Timeout("slow".to_owned()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad url".to_owned()).is_retryable());
        assert!(!TransportError::Other("redirect loop".to_owned()).is_retryable());
    }

    #[test]
    fn params_keep_insertion_order() {
        let request = FetchRequest::new("https://api.example/prices")
            .with_param("ids", "1,2")
            .with_param("countryCode", "US");
        assert_eq!(request.params, vec![
            ("ids".to_owned(), "1,2".to_owned()),
            ("countryCode".to_owned(), "US".to_owned()),
        ]);
    }
}
