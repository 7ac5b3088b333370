use std::future::Future;
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::lifecycle::LifecyclePhase;
use crate::probe::Transport;

pub const PROBE_ATTEMPTS: &str = "sidecar_probe_attempts_total";
pub const LIFECYCLE_PHASE: &str = "sidecar_lifecycle_phase";
pub const SDK_CALLS: &str = "sidecar_sdk_calls_total";

/// Bind a `TcpListener` on the provided bind address and serve `router` until `shutdown` resolves.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Build a Router exposing the recorder's metrics.
pub fn metrics_router(recorder_handle: PrometheusHandle) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

/// Install the global Prometheus recorder. Fails if one was already installed.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

pub fn record_probe_attempt(transport: Transport, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(PROBE_ATTEMPTS, "transport" => transport.as_str(), "outcome" => outcome)
        .increment(1);
}

pub fn record_sdk_call(call: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(SDK_CALLS, "call" => call, "outcome" => outcome).increment(1);
}

pub fn record_phase(phase: LifecyclePhase) {
    metrics::gauge!(LIFECYCLE_PHASE).set(f64::from(phase.ordinal()));
}
