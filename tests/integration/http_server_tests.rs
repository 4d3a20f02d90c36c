//! Integration tests for the HTTP server over a real socket
//!
//! These tests verify that the server:
//! - answers the run, save and fetch contract the browser client expects
//! - reports validation failures with 400 and unknown snippets with 404
//! - serves CORS headers for cross-origin callers

use reqwest::StatusCode;
use serde_json::json;
use snipbox_tests::common::{python3, setup_test_logging, test_app_config, TestServer};
use snipbox_tests::require_python;
use std::path::PathBuf;
use tempfile::TempDir;

/// Server for tests that never run a program
async fn storage_only_server(root: &TempDir) -> TestServer {
    let python = python3().unwrap_or_else(|| PathBuf::from("python3"));
    TestServer::start(test_app_config(root.path(), python))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_run_returns_output() {
    setup_test_logging();
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let server = TestServer::start(test_app_config(root.path(), python)).await.unwrap();

    let (status, body) = server
        .post("/run", json!({"code": "print('hi')", "input": ""}))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"output": "hi\n"}));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_run_feeds_input() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let server = TestServer::start(test_app_config(root.path(), python)).await.unwrap();

    let (status, body) = server
        .post(
            "/run",
            json!({"code": "name = input()\nprint(f'hello {name}')", "input": "ada\n"}),
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "hello ada\n");
}

#[tokio::test]
async fn test_run_error_is_200_with_error_field() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let server = TestServer::start(test_app_config(root.path(), python)).await.unwrap();

    let (status, body) = server
        .post("/run", json!({"code": "print(1/0)"}))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("ZeroDivisionError"));
    assert!(body.get("output").is_none());
}

#[tokio::test]
async fn test_run_without_code_is_400() {
    let root = TempDir::new().unwrap();
    let server = storage_only_server(&root).await;

    let (status, body) = server.post("/run", json!({"input": "5"})).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No code provided!"}));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_save_and_fetch_round_trip() {
    let root = TempDir::new().unwrap();
    let server = storage_only_server(&root).await;
    let source = "for i in range(3):\n    print(i)\n";

    let (status, body) = server.post("/save", json!({"code": source})).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

    let (status, body) = server.get(&format!("/code/{}", id)).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": source}));
}

#[tokio::test]
async fn test_fetch_unknown_is_404() {
    let root = TempDir::new().unwrap();
    let server = storage_only_server(&root).await;

    let (status, body) = server.get("/code/doesNotExist").await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Code not found."}));
}

#[tokio::test]
async fn test_saves_get_distinct_ids() {
    let root = TempDir::new().unwrap();
    let server = storage_only_server(&root).await;

    let (_, a) = server.post("/save", json!({"code": "a = 1"})).await.unwrap();
    let (_, b) = server.post("/save", json!({"code": "a = 1"})).await.unwrap();
    assert_ne!(a["id"], b["id"]);
    assert_eq!(server.state.store().len().await, 2);
}

#[tokio::test]
async fn test_health() {
    let root = TempDir::new().unwrap();
    let server = storage_only_server(&root).await;

    let (status, body) = server.get("/health").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["runtime"], "process");
    assert_eq!(body["stats"]["admitted"], 0);
}

#[tokio::test]
async fn test_cors_preflight() {
    let root = TempDir::new().unwrap();
    let server = storage_only_server(&root).await;

    let response = server
        .client()
        .request(reqwest::Method::OPTIONS, server.url("/run"))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let root = TempDir::new().unwrap();
    let python = python3().unwrap_or_else(|| PathBuf::from("python3"));
    let mut config = test_app_config(root.path(), python);
    config.server.max_body_bytes = 1024;
    let server = TestServer::start(config).await.unwrap();

    let response = server
        .client()
        .post(server.url("/save"))
        .json(&json!({"code": "x".repeat(4096)}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
