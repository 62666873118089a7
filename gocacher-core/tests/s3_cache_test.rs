//! S3 cache against an in-process S3-compatible server, reached through a
//! custom endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use gocacher_core::backends::S3Cache;
use gocacher_core::env::{self, MapEnv};
use gocacher_core::selector::maybe_s3_cache;
use gocacher_core::{Error, RemoteCache};
use tokio::net::TcpListener;

const NO_SUCH_KEY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"#;

/// Stored object: optional output id metadata and body.
type Object = (Option<String>, Bytes);

#[derive(Clone, Default)]
struct ServerState {
    /// Objects by action id, the last key segment.
    objects: Arc<Mutex<HashMap<String, Object>>>,
    /// Every `bucket/key` requested, in order.
    requested: Arc<Mutex<Vec<String>>>,
    /// Output id metadata of every put, in order.
    put_metadata: Arc<Mutex<Vec<Option<String>>>>,
}

fn action_of(key: &str) -> String {
    key.rsplit('/').next().unwrap_or_default().to_string()
}

async fn get_object(
    State(state): State<ServerState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    state
        .requested
        .lock()
        .unwrap()
        .push(format!("{}/{}", bucket, key));

    match state.objects.lock().unwrap().get(&action_of(&key)) {
        Some((output_id, body)) => {
            let mut headers = HeaderMap::new();
            if let Some(output_id) = output_id {
                headers.insert("x-amz-meta-outputid", output_id.parse().unwrap());
            }
            (headers, body.clone()).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "application/xml")],
            NO_SUCH_KEY,
        )
            .into_response(),
    }
}

async fn put_object(
    State(state): State<ServerState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    state
        .requested
        .lock()
        .unwrap()
        .push(format!("{}/{}", bucket, key));
    state.put_metadata.lock().unwrap().push(
        headers
            .get("x-amz-meta-outputid")
            .and_then(|value| value.to_str().ok())
            .map(String::from),
    );

    (StatusCode::OK, [("etag", "\"0\"")]).into_response()
}

async fn start_test_server(state: ServerState) -> String {
    let app = Router::new()
        .route("/:bucket/*key", get(get_object).put(put_object))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn s3_cache(endpoint: &str) -> S3Cache {
    let env = MapEnv::new()
        .with(env::AWS_REGION, "us-east-1")
        .with(env::AWS_ACCESS_KEY, "test-access")
        .with(env::AWS_SECRET_KEY, "test-secret")
        .with(env::S3_ENDPOINT, endpoint)
        .with(env::S3_BUCKET, "mybucket");

    let cache = maybe_s3_cache(&env, true).await.unwrap().unwrap();
    assert!(cache.has_custom_endpoint());
    cache
}

fn assert_action_key(requested: &str, action_id: &str) {
    let segments: Vec<&str> = requested.split('/').collect();
    assert_eq!(segments.len(), 6, "unexpected key {}", requested);
    assert_eq!(&segments[..3], ["mybucket", "cache", "v1"]);
    assert!(!segments[3].is_empty() && !segments[4].is_empty());
    assert_eq!(segments[5], action_id);
}

#[tokio::test]
async fn test_missing_object_is_a_miss() {
    let state = ServerState::default();
    let url = start_test_server(state.clone()).await;
    let cache = s3_cache(&url).await;

    assert!(cache.get("abcd01").await.unwrap().is_none());

    let requested = state.requested.lock().unwrap().clone();
    assert_eq!(requested.len(), 1);
    assert_action_key(&requested[0], "abcd01");
}

#[tokio::test]
async fn test_hit_returns_metadata_output_id_and_body() {
    let state = ServerState::default();
    state.objects.lock().unwrap().insert(
        "abcd02".to_string(),
        (
            Some("ef0102".to_string()),
            Bytes::from_static(b"object code"),
        ),
    );
    let url = start_test_server(state).await;
    let cache = s3_cache(&url).await;

    let entry = cache.get("abcd02").await.unwrap().unwrap();
    assert_eq!(entry.output_id, "ef0102");
    assert_eq!(entry.body, Bytes::from_static(b"object code"));
}

#[tokio::test]
async fn test_object_without_output_id_is_an_error() {
    let state = ServerState::default();
    state
        .objects
        .lock()
        .unwrap()
        .insert("abcd03".to_string(), (None, Bytes::from_static(b"orphan")));
    let url = start_test_server(state).await;
    let cache = s3_cache(&url).await;

    assert!(matches!(
        cache.get("abcd03").await,
        Err(Error::S3 { ref bucket, .. }) if bucket == "mybucket"
    ));
}

#[tokio::test]
async fn test_put_writes_action_key_with_output_id_metadata() {
    let state = ServerState::default();
    let url = start_test_server(state.clone()).await;
    let cache = s3_cache(&url).await;

    cache
        .put("abcd04", "ef0104", Bytes::from_static(b"built"))
        .await
        .unwrap();

    let requested = state.requested.lock().unwrap().clone();
    assert_eq!(requested.len(), 1);
    assert_action_key(&requested[0], "abcd04");
    assert_eq!(
        state.put_metadata.lock().unwrap().as_slice(),
        [Some("ef0104".to_string())]
    );
}
