use std::future::ready;
use std::path::PathBuf;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};

use sidecar_common::metrics::track_metrics;
use sidecar_common::shutdown::Shutdown;

use crate::config::ApiConfig;
use crate::handlers::{self, files, logs};
use crate::paths::DataRoot;
use crate::rate_limit::{rate_limit, ClientRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub root: DataRoot,
    pub stdout_log: PathBuf,
    /// Ends long-lived responses such as the log stream.
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(config: &ApiConfig, shutdown: Shutdown) -> Self {
        Self {
            root: DataRoot::new(&config.data_root),
            stdout_log: config.stdout_log_path(),
            shutdown,
        }
    }
}

/// Build the file API. Request spans are children of `span`.
pub fn app(
    state: AppState,
    limiter: ClientRateLimiter,
    max_upload_bytes: usize,
    metrics: Option<PrometheusHandle>,
    span: Span,
) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/files", get(files::list))
        .route("/api/files/download", get(files::download))
        .route(
            "/api/files/upload",
            post(files::upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/files/delete", post(files::delete))
        .route("/api/files/create-dir", post(files::create_dir))
        .route(
            "/api/logs/stream",
            get(logs::stream).layer(CorsLayer::new().allow_origin(Any)),
        )
        .with_state(state);

    // The recorder is global, only expose it when the caller installed one.
    let router = match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    };

    router
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http().make_span_with(move |req: &Request<Body>| {
                info_span!(parent: &span, "request", method = %req.method(), uri = %req.uri())
            }),
        )
}
