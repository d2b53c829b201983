//! End-to-end tests for the request pipeline
//!
//! Drives the full axum router with in-process requests: content
//! round-trips, negotiation, conditional headers, OPTIONS aggregation, and
//! the error taxonomy.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::BodyExt;
use std::sync::Arc;
use sutra::codec::{CodecRegistry, CodecResult, EncodedBody, Payload, PayloadKind};
use sutra::dispatch::default_table;
use sutra::lock::LockManager;
use sutra::store::{MemoryStore, Store};
use sutra::{CodecError, ObjectServer, ServerConfig};
use tower::ServiceExt;

fn build_server(registry: CodecRegistry) -> (Router, Arc<MemoryStore>, Arc<LockManager>) {
    let config = ServerConfig::default();
    let store = Arc::new(MemoryStore::new(&config.base_iri).unwrap());
    let locks = Arc::new(LockManager::new(
        config.lock_retry_limit,
        config.lock_retry_backoff,
    ));
    let server = ObjectServer::new(
        config,
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(registry),
        Arc::clone(&locks),
        Arc::new(default_table()),
    );
    (server.router(), store, locks)
}

fn build_default() -> (Router, Arc<MemoryStore>, Arc<LockManager>) {
    build_server(CodecRegistry::with_defaults())
}

async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn put_text(router: &Router, path: &str, body: &str) -> axum::response::Response {
    send(
        router,
        Request::builder()
            .method(Method::PUT)
            .uri(path)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let (router, store, _) = build_default();

    let response = put_text(&router, "/hello", "world").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key(header::ETAG));
    assert!(response.headers().contains_key(header::LAST_MODIFIED));

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/hello")
            .header(header::ACCEPT, "text/plain")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(body_bytes(response).await, Bytes::from("world"));

    // One committed PUT, and the GET only rolled back
    let stats = store.stats();
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_head_returns_headers_without_body() {
    let (router, _, _) = build_default();
    put_text(&router, "/hello", "world").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::HEAD)
            .uri("/hello")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::ETAG));
    assert_eq!(body_bytes(response).await, Bytes::new());
}

#[tokio::test]
async fn test_get_missing_resource_is_404() {
    let (router, _, _) = build_default();
    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/missing")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_longest_prefix_serves_parent_resource() {
    let (router, _, _) = build_default();
    put_text(&router, "/docs", "parent content").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/docs/nested/child")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from("parent content"));
}

#[tokio::test]
async fn test_delete_then_404() {
    let (router, store, _) = build_default();
    put_text(&router, "/doomed", "bye").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::DELETE)
            .uri("/doomed")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/doomed")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(store.stats().committed, 2);
}

#[tokio::test]
async fn test_append_operation() {
    let (router, _, _) = build_default();
    put_text(&router, "/log", "one").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::POST)
            .uri("/log?append")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(" two"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/log")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body_bytes(response).await, Bytes::from("one two"));
}

#[tokio::test]
async fn test_custom_media_type_round_trip() {
    let (router, _, _) = build_default();

    // The resource declares text/world; the identity writer serves it back
    let response = send(
        &router,
        Request::builder()
            .method(Method::PUT)
            .uri("/world")
            .header(header::CONTENT_TYPE, "text/world")
            .body(Body::from("payload"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/world")
            .header(header::ACCEPT, "text/world")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/world"
    );
    assert_eq!(body_bytes(response).await, Bytes::from("payload"));
}

#[tokio::test]
async fn test_registered_writer_answers_new_accept_type() {
    let mut registry = CodecRegistry::with_defaults();
    registry.register_writer(
        PayloadKind::Bytes,
        &["application/vnd.demo"],
        Some("application/vnd.demo"),
        |payload| match payload {
            Payload::Bytes(b) => Ok(EncodedBody::Full(b.clone())),
            _ => Err(CodecError::Encode("kind mismatch".into())),
        },
    );
    let (router, _, _) = build_server(registry);
    put_text(&router, "/demo", "demo bytes").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/demo")
            .header(header::ACCEPT, "application/vnd.demo")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.demo"
    );
    assert_eq!(body_bytes(response).await, Bytes::from("demo bytes"));
}

#[tokio::test]
async fn test_unsatisfiable_accept_redirects_to_description() {
    let (router, _, _) = build_default();
    put_text(&router, "/hello", "world").await;

    // Content negotiation fails, but the describe operation is advertised
    // as the fallback representation
    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/hello")
            .header(header::ACCEPT, "application/vnd.unregistered")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/hello?describe"
    );
}

#[tokio::test]
async fn test_unsatisfiable_accept_with_selector_is_406() {
    let (router, _, _) = build_default();
    put_text(&router, "/hello", "world").await;

    // An explicit operation gets no alternate fallback
    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/hello?metadata")
            .header(header::ACCEPT, "text/csv")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_describe_serves_turtle() {
    let (router, _, _) = build_default();
    put_text(&router, "/doc", "body").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/doc?describe")
            .header(header::ACCEPT, "text/turtle")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/turtle"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    let turtle = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(turtle.contains("dcterms:format \"text/plain\""));
    assert!(turtle.contains("<http://localhost:8080/doc>"));
}

#[tokio::test]
async fn test_annotate_then_describe_includes_note() {
    let (router, _, _) = build_default();
    put_text(&router, "/doc", "body").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::POST)
            .uri("/doc?annotate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"note":"reviewed"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/doc?describe")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let turtle = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(turtle.contains("reviewed"));
}

#[tokio::test]
async fn test_metadata_operation_returns_json() {
    let (router, _, _) = build_default();
    put_text(&router, "/doc", "body").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/doc?metadata")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(value["path"], "/doc");
    assert_eq!(value["mediaType"], "text/plain");
    assert_eq!(value["bytes"], 4);
    assert_eq!(value["iri"], "http://localhost:8080/doc");
}

#[tokio::test]
async fn test_annotate_with_wrong_content_type_is_400() {
    let (router, store, _) = build_default();
    put_text(&router, "/doc", "body").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::POST)
            .uri("/doc?annotate")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.stats().active, 0);
}

#[tokio::test]
async fn test_malformed_json_body_is_400() {
    let (router, _, _) = build_default();
    put_text(&router, "/doc", "body").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::POST)
            .uri("/doc?annotate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{broken"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_method_not_allowed_carries_allow_header() {
    let (router, _, _) = build_default();
    let response = send(
        &router,
        Request::builder()
            .method(Method::PATCH)
            .uri("/hello")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = response
        .headers()
        .get(header::ALLOW)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(allow.contains("GET"));
    assert!(allow.contains("PUT"));
}

#[tokio::test]
async fn test_trace_is_not_allowed() {
    let (router, _, _) = build_default();
    let response = send(
        &router,
        Request::builder()
            .method(Method::TRACE)
            .uri("/hello")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_options_aggregates_methods_and_cors_headers() {
    let (router, _, _) = build_default();
    let response = send(
        &router,
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/hello")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let allow = response
        .headers()
        .get(header::ALLOW)
        .unwrap()
        .to_str()
        .unwrap();
    for method in ["GET", "HEAD", "PUT", "DELETE", "POST", "OPTIONS"] {
        assert!(allow.contains(method), "Allow missing {}: {}", method, allow);
    }
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap(),
        allow
    );
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("If-Match"));
}

#[tokio::test]
async fn test_conditional_get_yields_304_twice() {
    let (router, _, _) = build_default();
    put_text(&router, "/cached", "content").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/cached")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // Unchanged resource state: the same conditional GET is 304 both times
    for _ in 0..2 {
        let response = send(
            &router,
            Request::builder()
                .method(Method::GET)
                .uri("/cached")
                .header(header::IF_MODIFIED_SINCE, &last_modified)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().contains_key(header::ETAG));
        assert_eq!(body_bytes(response).await, Bytes::new());
    }
}

#[tokio::test]
async fn test_if_none_match_yields_304() {
    let (router, _, _) = build_default();
    put_text(&router, "/cached", "content").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/cached")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let etag = response
        .headers()
        .get(header::ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/cached")
            .header(header::IF_NONE_MATCH, &etag)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_stale_if_unmodified_since_is_412() {
    let (router, store, _) = build_default();
    put_text(&router, "/guarded", "v1").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/guarded")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // A date two seconds before the stored modification time is stale
    let stale = {
        use chrono::DateTime;
        let parsed =
            DateTime::parse_from_rfc2822(&last_modified.replace("GMT", "+0000")).unwrap();
        (parsed - chrono::Duration::seconds(2))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    };

    let committed_before = store.stats().committed;
    let response = send(
        &router,
        Request::builder()
            .method(Method::PUT)
            .uri("/guarded")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::IF_UNMODIFIED_SINCE, &stale)
            .body(Body::from("v2"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    // The rejected write committed nothing
    assert_eq!(store.stats().committed, committed_before);

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/guarded")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body_bytes(response).await, Bytes::from("v1"));
}

#[tokio::test]
async fn test_if_match_mismatch_is_412() {
    let (router, _, _) = build_default();
    put_text(&router, "/guarded", "v1").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::PUT)
            .uri("/guarded")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::IF_MATCH, "\"0000000000000000\"")
            .body(Body::from("v2"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_status_endpoint_reports_counters() {
    let (router, _, _) = build_default();
    put_text(&router, "/x", "1").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/api/status")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(value["status"], "healthy");
    assert_eq!(value["transactions"]["committed"], 1);
    assert_eq!(value["locks"]["acquired"], value["locks"]["released"]);
}

#[tokio::test]
async fn test_large_response_streams_and_closes_after_drain() {
    let (router, store, _) = build_default();

    // Above the 1024-byte buffer threshold
    let big = "x".repeat(5000);
    let response = send(
        &router,
        Request::builder()
            .method(Method::PUT)
            .uri("/big")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(big.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/big")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap(),
        "5000"
    );

    // The GET transaction stays open until the body is drained
    assert_eq!(store.stats().active, 1);

    let collected = body_bytes(response).await;
    assert_eq!(collected.len(), 5000);
    assert_eq!(store.stats().active, 0);
}

#[tokio::test]
async fn test_unbounded_stream_writer_closes_on_drain() {
    let mut registry = CodecRegistry::with_defaults();
    registry.register_writer(
        PayloadKind::Bytes,
        &["application/x-stream"],
        Some("application/x-stream"),
        |payload| match payload {
            Payload::Bytes(b) => {
                let chunks: Vec<CodecResult<Bytes>> = b
                    .chunks(3)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(EncodedBody::Stream {
                    length: None,
                    stream: futures::stream::iter(chunks).boxed(),
                })
            }
            _ => Err(CodecError::Encode("kind mismatch".into())),
        },
    );
    let (router, store, _) = build_server(registry);
    put_text(&router, "/chunky", "streaming-content").await;

    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/chunky")
            .header(header::ACCEPT, "application/x-stream")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    assert_eq!(store.stats().active, 1);

    let collected = body_bytes(response).await;
    assert_eq!(collected, Bytes::from("streaming-content"));
    assert_eq!(store.stats().active, 0);
}

#[tokio::test]
async fn test_aborted_stream_rolls_back() {
    let (router, store, _) = build_default();
    let big = "y".repeat(5000);
    send(
        &router,
        Request::builder()
            .method(Method::PUT)
            .uri("/abort")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(big))
            .unwrap(),
    )
    .await;

    let rolled_back_before = store.stats().rolled_back;
    let response = send(
        &router,
        Request::builder()
            .method(Method::GET)
            .uri("/abort")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(store.stats().active, 1);

    // Client disconnect: drop the response without reading the body
    drop(response);

    assert_eq!(store.stats().active, 0);
    assert_eq!(store.stats().rolled_back, rolled_back_before + 1);
}
