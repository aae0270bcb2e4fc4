//! Retry loop and order-preserving fan-out.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::transport::{FetchRequest, HttpTransport, RawResponse, Transport, TransportError};

/// Query parameters for one request.
pub type Params = Vec<(String, String)>;

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// A single URL.
    One {
        /// Target URL.
        url: String,
        /// Query parameters.
        params: Params,
    },
    /// Several URLs sharing the same parameters.
    Urls {
        /// Target URLs, in result order.
        urls: Vec<String>,
        /// Query parameters applied to every URL.
        params: Params,
    },
    /// One URL queried once per parameter set.
    Batched {
        /// Target URL.
        url: String,
        /// One parameter set per request, in result order.
        param_sets: Vec<Params>,
    },
}

/// Result of [`FetchClient::fetch_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Body of a [`FetchTarget::One`] request.
    One(Value),
    /// One outcome per request, in input order. A failed item never
    /// affects its siblings.
    Many(Vec<Result<Value, FetchError>>),
}

impl Fetched {
    /// The list of outcomes. A single body becomes a one-element list.
    pub fn into_many(self) -> Vec<Result<Value, FetchError>> {
        match self {
            Self::One(value) => vec![Ok(value)],
            Self::Many(items) => items,
        }
    }
}

/// Outcome of a single attempt.
enum Attempt {
    Done(Value),
    Retry(String),
    Fail(FetchError),
}

/// JSON client with bounded concurrency and retry.
#[derive(Debug, Clone)]
pub struct FetchClient<T = HttpTransport> {
    transport: T,
    config: FetchConfig,
}

impl FetchClient<HttpTransport> {
    /// Client over the production HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unknown`] if the HTTP client cannot be built.
    pub fn http(config: FetchConfig) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> FetchClient<T> {
    /// Client over an arbitrary transport.
    pub const fn new(transport: T, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    /// The active configuration.
    pub const fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch one target shape.
    ///
    /// `Urls` and `Batched` targets run with at most `concurrency`
    /// requests in flight and yield results in input order regardless of
    /// completion order.
    ///
    /// # Errors
    ///
    /// Only a [`FetchTarget::One`] request fails the call as a whole;
    /// list targets report failures per item.
    pub async fn fetch_json(&self, target: FetchTarget) -> Result<Fetched, FetchError> {
        match target {
            FetchTarget::One { url, params } => {
                let request = FetchRequest { url, params };
                self.get_json(&request).await.map(Fetched::One)
            }
            FetchTarget::Urls { urls, params } => {
                let requests = urls
                    .into_iter()
                    .map(|url| FetchRequest {
                        url,
                        params: params.clone(),
                    })
                    .collect();
                Ok(Fetched::Many(self.fetch_many(requests).await))
            }
            FetchTarget::Batched { url, param_sets } => {
                let requests = param_sets
                    .into_iter()
                    .map(|params| FetchRequest {
                        url: url.clone(),
                        params,
                    })
                    .collect();
                Ok(Fetched::Many(self.fetch_many(requests).await))
            }
        }
    }

    /// Run `requests` with bounded concurrency, preserving input order.
    pub async fn fetch_many(&self, requests: Vec<FetchRequest>) -> Vec<Result<Value, FetchError>> {
        let limit = self.config.concurrency.max(1);
        stream::iter(requests)
            .map(|request| async move { self.get_json(&request).await })
            .buffered(limit)
            .collect()
            .await
    }

    /// Fetch and decode one JSON body, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NotFound`] on a 404, without retrying.
    /// - [`FetchError::BadRequest`] on a 400 or an unbuildable request.
    /// - [`FetchError::Network`] once `retries + 1` attempts have failed
    ///   transiently.
    /// - [`FetchError::Unknown`] for anything else.
    pub async fn get_json(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            debug!(url = %request.url, attempt, "Fetching");

            let outcome = match self.transport.get(request).await {
                Ok(response) => classify_response(&request.url, response),
                Err(err) => classify_transport_error(err),
            };

            match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(err) => {
                    if !err.is_not_found() {
                        error!(url = %request.url, attempt, error = %err, "Fetch failed");
                    }
                    return Err(err);
                }
                Attempt::Retry(cause) => {
                    if attempt > policy.retries {
                        error!(url = %request.url, attempts = attempt, %cause, "Retry budget exhausted");
                        return Err(FetchError::Network {
                            attempts: attempt,
                            cause,
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        %cause,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Classify a completed exchange by status.
fn classify_response(url: &str, response: RawResponse) -> Attempt {
    match response.status {
        200..=299 => match serde_json::from_slice(&response.body) {
            Ok(value) => Attempt::Done(value),
            Err(e) => Attempt::Fail(FetchError::Unknown(format!(
                "invalid JSON from {url}: {e}"
            ))),
        },
        404 => Attempt::Fail(FetchError::NotFound {
            url: url.to_owned(),
        }),
        400 => Attempt::Fail(FetchError::BadRequest(format!(
            "{url} rejected the request: {}",
            String::from_utf8_lossy(&response.body)
        ))),
        408 | 425 | 429 | 500..=599 => Attempt::Retry(format!("HTTP {}", response.status)),
        status => Attempt::Fail(FetchError::Unknown(format!(
            "unexpected HTTP {status} from {url}"
        ))),
    }
}

/// Classify a wire-level failure.
fn classify_transport_error(err: TransportError) -> Attempt {
    if err.is_retryable() {
        return Attempt::Retry(err.to_string());
    }
    match err {
        TransportError::InvalidRequest(cause) => Attempt::Fail(FetchError::BadRequest(cause)),
        other => Attempt::Fail(FetchError::Unknown(other.to_string())),
    }
}
