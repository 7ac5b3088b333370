use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{info, warn, Instrument, Span};

use sidecar_common::shutdown::Shutdown;

use crate::config::ApiConfig;
use crate::error::ServerError;
use crate::rate_limit::{run_cleanup, ClientRateLimiter, CLEANUP_INTERVAL};
use crate::router::{app, AppState};

/// How long in-flight requests may take to finish once shutdown starts.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Bind the configured address and serve the file API until `shutdown` is triggered.
pub async fn serve(
    config: ApiConfig,
    metrics: Option<PrometheusHandle>,
    shutdown: Shutdown,
    span: Span,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| ServerError::Bind {
            bind: config.bind.clone(),
            source,
        })?;

    serve_listener(listener, config, metrics, shutdown, span).await
}

pub async fn serve_listener(
    listener: TcpListener,
    config: ApiConfig,
    metrics: Option<PrometheusHandle>,
    shutdown: Shutdown,
    span: Span,
) -> Result<(), ServerError> {
    let limiter = ClientRateLimiter::new(config.rate_limit)?;
    tokio::spawn(
        run_cleanup(limiter.clone(), CLEANUP_INTERVAL, shutdown.clone()).instrument(span.clone()),
    );

    let router = app(
        AppState::new(&config, shutdown.clone()),
        limiter,
        config.max_upload_bytes,
        metrics,
        span.clone(),
    );

    info!(
        parent: &span,
        address = ?listener.local_addr().ok(),
        data_root = %config.data_root.display(),
        "starting file API server"
    );

    run(listener, router, shutdown).instrument(span).await
}

async fn run(listener: TcpListener, router: Router, shutdown: Shutdown) -> Result<(), ServerError> {
    let token = shutdown.token();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(token.cancelled_owned())
        .await
    });

    tokio::select! {
        result = &mut server => return result?.map_err(ServerError::Serve),
        _ = shutdown.triggered() => {}
    }

    info!("shutting down file API server");
    match timeout(SHUTDOWN_GRACE_PERIOD, &mut server).await {
        Ok(result) => result?.map_err(ServerError::Serve),
        Err(_) => {
            warn!(
                grace_period = ?SHUTDOWN_GRACE_PERIOD,
                "file API did not drain in time, dropping remaining connections"
            );
            server.abort();
            Ok(())
        }
    }
}
