//! Shared helpers for HTTP integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use code_sandbox::backend::ProcessBackend;
use code_sandbox::config::Config;
use code_sandbox::http;
use code_sandbox::language::LanguageRecipe;
use code_sandbox::sandbox::Sandbox;

/// Recipes that only need a POSIX `sh`, so tests run on minimal hosts.
pub fn test_recipes() -> Vec<LanguageRecipe> {
    let json = r#"[
        { "name": "posix", "aliases": ["psh"], "command": "sh", "file_extension": "sh" },
        { "name": "sh-inline", "command": "sh", "args": ["-c", "{source}"], "requires_temp_file": false },
        { "name": "ghost", "command": "no-such-interpreter", "file_extension": "gh" }
    ]"#;
    serde_json::from_str(json).unwrap()
}

/// Build a test `Config` rooted at `scratch_dir`.
pub fn test_config(scratch_dir: &Path, timeout_ms: u64) -> Config {
    Config {
        timeout_ms,
        scratch_dir: scratch_dir.to_path_buf(),
        languages: test_recipes(),
        ..Config::default()
    }
}

/// Build the full application router over the real process backend.
///
/// Mirrors `main.rs` so tests exercise the same middleware stack.
pub fn build_test_app(scratch_dir: &Path, timeout_ms: u64) -> Router {
    let config = test_config(scratch_dir, timeout_ms);
    let languages = config.language_table().unwrap();
    let sandbox = Sandbox::new(&config, languages, ProcessBackend::new());
    http::router(Arc::new(sandbox), &config.server)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_raw(app: Router, uri: &str, body: impl Into<Body>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

pub async fn execute(app: Router, code: &str, language: &str) -> Response<Body> {
    post_json(
        app,
        "/execute",
        serde_json::json!({ "code": code, "language": language }),
    )
    .await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Number of entries left in the scratch directory.
pub fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

pub fn has_interpreter(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}
