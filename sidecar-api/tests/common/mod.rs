#![allow(dead_code)]

use std::path::Path;

use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tracing::Span;

use sidecar_api::config::ApiConfig;
use sidecar_api::rate_limit::ClientRateLimiter;
use sidecar_api::router::{app, AppState};
use sidecar_common::shutdown::Shutdown;

pub const BOUNDARY: &str = "sidecar-test-boundary";

pub struct TestApp {
    pub dir: TempDir,
    pub config: ApiConfig,
    pub shutdown: Shutdown,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rate_limit(10_000)
    }

    pub fn with_rate_limit(rate_limit: u32) -> Self {
        let dir = tempfile::tempdir().expect("failed to create data root");
        let config = ApiConfig {
            enabled: true,
            bind: "127.0.0.1:0".to_owned(),
            data_root: dir.path().to_path_buf(),
            stdout_file: "stdout.log".to_owned(),
            rate_limit,
            max_upload_bytes: 1024,
        };

        Self {
            dir,
            config,
            shutdown: Shutdown::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn router(&self) -> Router {
        app(
            AppState::new(&self.config, self.shutdown.clone()),
            ClientRateLimiter::new(self.config.rate_limit).unwrap(),
            self.config.max_upload_bytes,
            None,
            Span::none(),
        )
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_owned()))
        .unwrap()
}

pub fn upload(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
