//! The real `reqwest` transport against an in-process provider stub.
//!
//! The stub binds `127.0.0.1:0`, so these tests need no external
//! services.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::missing_panics_doc
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use catalog_fetch::{ApiHosts, CatalogApi, FetchClient, FetchConfig, FetchError, FetchRequest};
use serde_json::json;

#[derive(Clone, Default)]
struct StubState {
    flaky_hits: Arc<AtomicUsize>,
}

async fn game(Path(id): Path<i64>) -> impl IntoResponse {
    if id == 404 {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({"id": id, "title": format!("Game {id}")})).into_response()
}

async fn flaky(State(state): State<StubState>) -> impl IntoResponse {
    if state.flaky_hits.fetch_add(1, Ordering::SeqCst) < 2 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({"ok": true})).into_response()
}

async fn prices(Query(params): Query<Vec<(String, String)>>) -> impl IntoResponse {
    Json(json!({"echo": params}))
}

async fn spawn_stub() -> (String, StubState) {
    let state = StubState::default();
    let app = Router::new()
        .route("/v2/games/{id}", get(game))
        .route("/flaky", get(flaky))
        .route("/products/prices", get(prices))
        .route("/garbage", get(|| async { "not json" }))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn fast_config() -> FetchConfig {
    FetchConfig::default()
        .with_retries(3)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn fetches_and_decodes_json() {
    let (base, _) = spawn_stub().await;
    let client = FetchClient::http(fast_config()).unwrap();

    let body = client
        .get_json(&FetchRequest::new(format!("{base}/v2/games/7")))
        .await
        .unwrap();

    assert_eq!(body["title"], "Game 7");
}

#[tokio::test]
async fn http_404_is_not_found() {
    let (base, _) = spawn_stub().await;
    let client = FetchClient::http(fast_config()).unwrap();

    let err = client
        .get_json(&FetchRequest::new(format!("{base}/v2/games/404")))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::NotFound { .. }));
}

#[tokio::test]
async fn service_unavailable_is_retried_until_success() {
    let (base, state) = spawn_stub().await;
    let client = FetchClient::http(fast_config()).unwrap();

    let body = client
        .get_json(&FetchRequest::new(format!("{base}/flaky")))
        .await
        .unwrap();

    assert_eq!(body, json!({"ok": true}));
    assert_eq!(state.flaky_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_json_body_is_unknown() {
    let (base, _) = spawn_stub().await;
    let client = FetchClient::http(fast_config()).unwrap();

    let err = client
        .get_json(&FetchRequest::new(format!("{base}/garbage")))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Unknown(_)));
}

#[tokio::test]
async fn refused_connections_end_in_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = FetchClient::http(fast_config()).unwrap();

    let err = client
        .get_json(&FetchRequest::new(format!("http://{addr}/v2/games/1")))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Network { attempts: 4, .. }));
}

#[tokio::test]
async fn malformed_url_is_bad_request() {
    let client = FetchClient::http(fast_config()).unwrap();

    let err = client
        .get_json(&FetchRequest::new("not a url"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::BadRequest(_)));
}

#[tokio::test]
async fn api_sends_batched_price_queries() {
    let (base, _) = spawn_stub().await;
    let hosts = ApiHosts {
        prices: format!("{base}/products/prices"),
        ..ApiHosts::default()
    };
    let api = CatalogApi::new(FetchClient::http(fast_config()).unwrap(), hosts, "en-US");

    let results = api.prices(&[1, 2], &["US".to_owned()]).await;

    let (country, body) = &results[0];
    assert_eq!(country, "US");
    assert_eq!(
        body.as_ref().unwrap()["echo"],
        json!([["ids", "1,2"], ["countryCode", "US"]])
    );
}
