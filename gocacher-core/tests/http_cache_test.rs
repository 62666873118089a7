//! HTTP cache against an in-process server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use gocacher_core::backends::HttpCache;
use gocacher_core::{Error, RemoteCache};
use serde_json::json;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct ServerState {
    actions: Arc<Mutex<HashMap<String, String>>>,
    outputs: Arc<Mutex<HashMap<String, Bytes>>>,
    /// When set, every action lookup answers with this status.
    fail_with: Arc<Mutex<Option<StatusCode>>>,
    action_requests: Arc<AtomicUsize>,
}

async fn get_action(State(state): State<ServerState>, Path(action): Path<String>) -> Response {
    state.action_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = *state.fail_with.lock().unwrap() {
        return status.into_response();
    }
    match state.actions.lock().unwrap().get(&action) {
        Some(output) => Json(json!({ "OutputID": output })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_output(State(state): State<ServerState>, Path(output): Path<String>) -> Response {
    match state.outputs.lock().unwrap().get(&output) {
        Some(body) => body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_entry(
    State(state): State<ServerState>,
    Path((action, output)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    state.actions.lock().unwrap().insert(action, output.clone());
    state.outputs.lock().unwrap().insert(output, body);
    StatusCode::CREATED
}

async fn start_test_server(state: ServerState) -> String {
    let app = Router::new()
        .route("/action/:action", get(get_action))
        .route("/output/:output", get(get_output))
        .route("/:action/:output", put(put_entry))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_put_then_get() {
    let state = ServerState::default();
    let url = start_test_server(state.clone()).await;
    let cache = HttpCache::new(&url, true).unwrap();

    cache
        .put("aaaa01", "bbbb01", Bytes::from_static(b"compiled"))
        .await
        .unwrap();
    assert_eq!(
        state.actions.lock().unwrap().get("aaaa01").map(String::as_str),
        Some("bbbb01")
    );

    let entry = cache.get("aaaa01").await.unwrap().unwrap();
    assert_eq!(entry.output_id, "bbbb01");
    assert_eq!(entry.body, Bytes::from_static(b"compiled"));
}

#[tokio::test]
async fn test_unknown_action_is_a_miss() {
    let url = start_test_server(ServerState::default()).await;
    let cache = HttpCache::new(&url, false).unwrap();

    assert!(cache.get("aaaa02").await.unwrap().is_none());
}

#[tokio::test]
async fn test_action_without_output_is_a_miss() {
    let state = ServerState::default();
    state
        .actions
        .lock()
        .unwrap()
        .insert("aaaa03".to_string(), "bbbb03".to_string());
    let url = start_test_server(state).await;
    let cache = HttpCache::new(&url, false).unwrap();

    assert!(cache.get("aaaa03").await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_output_id_is_rejected() {
    let state = ServerState::default();
    state
        .actions
        .lock()
        .unwrap()
        .insert("aaaa05".to_string(), "../admin".to_string());
    let url = start_test_server(state).await;
    let cache = HttpCache::new(&url, false).unwrap();

    assert!(matches!(
        cache.get("aaaa05").await,
        Err(Error::InvalidId { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_server_errors_after_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let cache = HttpCache::new(&url, false)
        .unwrap()
        .with_retries(2, Duration::from_millis(1));

    assert!(cache.get("aaaa04").await.is_err());
    assert!(cache
        .put("aaaa04", "bbbb04", Bytes::from_static(b"x"))
        .await
        .is_err());
}

async fn failing_server(status: StatusCode) -> (ServerState, HttpCache) {
    let state = ServerState::default();
    *state.fail_with.lock().unwrap() = Some(status);
    let url = start_test_server(state.clone()).await;
    let cache = HttpCache::new(&url, false)
        .unwrap()
        .with_retries(3, Duration::from_millis(1));
    (state, cache)
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    for status in [StatusCode::BAD_REQUEST, StatusCode::FORBIDDEN] {
        let (state, cache) = failing_server(status).await;

        assert!(cache.get("aaaa06").await.is_err());
        assert_eq!(state.action_requests.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (state, cache) = failing_server(StatusCode::SERVICE_UNAVAILABLE).await;

    assert!(cache.get("aaaa07").await.is_err());
    assert_eq!(state.action_requests.load(Ordering::SeqCst), 4);
}
