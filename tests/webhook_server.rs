use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use context_connectors::config::{FilesystemSourceConfig, WebhookConfig};
use context_connectors::engine::memory::MemoryEngineFactory;
use context_connectors::indexer::Indexer;
use context_connectors::server::{build_router, WebhookEndpoint};
use context_connectors::sources::filesystem::FilesystemSource;
use context_connectors::sources::Source;
use context_connectors::stores::memory::MemoryStore;
use context_connectors::stores::Store;
use context_connectors::tools::{ToolContext, ToolRegistry};
use context_connectors::webhook::{sign, WebhookHandler};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "webhook-secret";

fn push_body(git_ref: &str, deleted: bool) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ref": git_ref,
        "before": "1".repeat(40),
        "after": "2".repeat(40),
        "deleted": deleted,
        "repository": { "full_name": "acme/widgets", "default_branch": "main" }
    }))
    .unwrap()
}

fn app(tmp: &TempDir, store: Arc<MemoryStore>) -> Router {
    std::fs::write(tmp.path().join("README.md"), "# Widgets\n").unwrap();
    let root = tmp.path().to_path_buf();

    let indexer = Arc::new(Indexer::new(Arc::new(MemoryEngineFactory::default())));
    let handler = WebhookHandler::new(indexer, store, &WebhookConfig::default()).with_source(
        move |_| {
            Ok(Box::new(FilesystemSource::new(FilesystemSourceConfig::new(&root))) as Box<dyn Source>)
        },
    );

    build_router(
        Arc::new(ToolRegistry::with_builtins()),
        ToolContext::default(),
        Some(WebhookEndpoint {
            handler: Arc::new(handler),
            secret: SECRET.to_string(),
        }),
    )
}

fn delivery(event: Option<&str>, signature: Option<String>, body: Vec<u8>) -> Request<Body> {
    let mut req = Request::post("/webhook").header("content-type", "application/json");
    if let Some(event) = event {
        req = req.header("x-github-event", event);
    }
    if let Some(signature) = signature {
        req = req.header("x-hub-signature-256", signature);
    }
    req.body(Body::from(body)).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_headers_are_bad_request() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, Arc::new(MemoryStore::new()));
    let body = push_body("refs/heads/main", false);

    let no_signature = app
        .clone()
        .oneshot(delivery(Some("push"), None, body.clone()))
        .await
        .unwrap();
    assert_eq!(no_signature.status(), StatusCode::BAD_REQUEST);

    let no_event = app
        .oneshot(delivery(None, Some(sign(&body, SECRET)), body))
        .await
        .unwrap();
    assert_eq!(no_event.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized_and_does_not_index() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let app = app(&tmp, store.clone());
    let body = push_body("refs/heads/main", false);

    let response = app
        .oneshot(delivery(Some("push"), Some(sign(&body, "wrong-secret")), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signed_push_indexes_branch() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let app = app(&tmp, store.clone());
    let body = push_body("refs/heads/main", false);

    let response = app
        .oneshot(delivery(Some("push"), Some(sign(&body, SECRET)), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result = body_json(response).await;
    assert_eq!(result["status"], "indexed");
    assert_eq!(result["key"], "acme/widgets/main");
    assert_eq!(result["result"]["type"], "full");
    assert_eq!(result["result"]["filesIndexed"], 1);
    assert!(store.load("acme/widgets/main").await.unwrap().is_some());
}

#[tokio::test]
async fn test_tag_push_and_ping_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let app = app(&tmp, store.clone());

    let tag = push_body("refs/tags/v1.0", false);
    let response = app
        .clone()
        .oneshot(delivery(Some("push"), Some(sign(&tag, SECRET)), tag))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "skipped");

    let ping = br#"{"zen":"Keep it logically awesome."}"#.to_vec();
    let response = app
        .oneshot(delivery(Some("ping"), Some(sign(&ping, SECRET)), ping))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "skipped");
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_push_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, Arc::new(MemoryStore::new()));
    let body = b"{\"ref\": 42}".to_vec();

    let response = app
        .oneshot(delivery(Some("push"), Some(sign(&body, SECRET)), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
