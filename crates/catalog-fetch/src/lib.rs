//! Provider fetch layer.
//!
//! Executes GET requests against the catalog provider with bounded
//! fan-out, automatic retry of transient failures, and a closed error
//! taxonomy: every non-success path ends in exactly one [`FetchError`]
//! variant, never a raw transport error.
//!
//! # Architecture
//!
//! ```text
//! CatalogApi (endpoint wrappers)
//!     |
//!     +-- FetchClient::fetch_json (One / Urls / Batched)
//!         |-- buffered fan-out, results in request order
//!         +-- FetchClient::get_json (retry loop, classification)
//!             +-- Transport (HttpTransport over reqwest)
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Concurrency, retry, and HTTP settings
//! - [`error`] -- The closed error taxonomy
//! - [`transport`] -- The transport seam and the `reqwest` implementation
//! - [`client`] -- Retry loop and order-preserving fan-out
//! - [`api`] -- Provider endpoint wrappers

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use api::{ApiHosts, CatalogApi};
pub use client::{FetchClient, FetchTarget, Fetched, Params};
pub use config::{FetchConfig, RetryPolicy};
pub use error::FetchError;
pub use transport::{FetchRequest, HttpTransport, RawResponse, Transport, TransportError};
