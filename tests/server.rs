mod common;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{login_and_cart, open_config, KeywordEmbedder, KEYWORD_MODEL};
use issue_dedup::embedding::Embedder;
use issue_dedup::ingest::ingest;
use issue_dedup::models::Metric;
use issue_dedup::query::QueryService;
use issue_dedup::server::router;

async fn test_app() -> (TempDir, Router) {
    app_with(Arc::new(KeywordEmbedder)).await
}

/// Ingest with the keyword embedder, then serve queries through `embedder`.
async fn app_with(embedder: Arc<dyn Embedder>) -> (TempDir, Router) {
    let tmp = TempDir::new().unwrap();
    let config = open_config(tmp.path(), Metric::InnerProduct);
    ingest(&config, &KeywordEmbedder, &login_and_cart())
        .await
        .unwrap();
    let service = QueryService::open(&config, embedder).unwrap();
    (tmp, router(Arc::new(service)))
}

/// Matches the index at startup, then misbehaves on every query.
enum BrokenEmbedder {
    Unreachable,
    ShortVectors,
}

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        KEYWORD_MODEL
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            BrokenEmbedder::Unreachable => anyhow::bail!("connection refused"),
            BrokenEmbedder::ShortVectors => Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()),
        }
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_search(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/search")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_tmp, app) = test_app().await;
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["issues"], 2);
}

#[tokio::test]
async fn test_search_returns_ranked_matches() {
    let (_tmp, app) = test_app().await;
    let (status, body) = send(
        app,
        post_search(r#"{"summary":"login failure","description":"unable to authenticate"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let matches = body["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0]["issue"]["id"], "A");
    assert_eq!(matches[0]["issue"]["summary"], "Login fails");
    assert_eq!(matches[1]["issue"]["id"], "B");
    assert_eq!(matches[0]["metric"], "inner_product");
    assert!(
        matches[0]["similarity_or_distance"].as_f64().unwrap()
            > matches[1]["similarity_or_distance"].as_f64().unwrap()
    );
}

#[tokio::test]
async fn test_empty_report_is_bad_request() {
    let (_tmp, app) = test_app().await;
    let (status, body) = send(app, post_search(r#"{"summary":"","description":"  "}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_missing_field_rejected_before_search() {
    let (_tmp, app) = test_app().await;
    let (status, _) = send(app, post_search(r#"{"summary":"login failure"}"#)).await;
    assert!(status.is_client_error(), "got {}", status);
}

#[tokio::test]
async fn test_embedding_backend_failure_is_bad_gateway() {
    let (_tmp, app) = app_with(Arc::new(BrokenEmbedder::Unreachable)).await;
    let (status, body) = send(
        app,
        post_search(r#"{"summary":"login failure","description":"unable to authenticate"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "embedding_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_wrong_width_query_vector_is_model_mismatch() {
    let (_tmp, app) = app_with(Arc::new(BrokenEmbedder::ShortVectors)).await;
    let (status, body) = send(
        app,
        post_search(r#"{"summary":"login failure","description":"unable to authenticate"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "model_mismatch");
}
