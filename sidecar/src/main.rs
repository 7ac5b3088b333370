//! Readiness and health sidecar for game servers running on Agones.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span};

use sidecar::config::Config;
use sidecar::logging::{init_tracing, LogConfig};
use sidecar_api::error::ServerError;
use sidecar_api::server::serve as serve_api;
use sidecar_common::lifecycle::LifecycleManager;
use sidecar_common::metrics::{metrics_router, serve, setup_metrics_recorder};
use sidecar_common::probe::probe_for;
use sidecar_common::sdk::AgonesSdk;
use sidecar_common::shutdown::{trigger_on_signal, Shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::init_from_env().wrap_err("invalid AGNOSTIC_SIDECAR_LOG_FORMAT")?;
    init_tracing(log_config.format);

    let result = run().await;
    if let Err(ref err) = result {
        error!(error = ?err, "sidecar exited with an error");
    }
    result
}

async fn run() -> Result<()> {
    let config = Config::init_from_env().wrap_err("invalid configuration")?;
    let lifecycle_config = config.lifecycle().wrap_err("invalid configuration")?;

    info!(
        ping_address = %config.target().address(),
        ping_protocol = %config.ping_protocol,
        initial_delay = ?config.initial_delay.0,
        health_interval = ?config.health_interval.0,
        retry_interval = ?config.retry_interval.0,
        api_enabled = config.api.enabled,
        "starting agnostic Agones sidecar"
    );

    let shutdown = Shutdown::new();
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = trigger_on_signal(signals).await {
            error!(error = %err, "failed to install signal handlers");
        }
    });

    let metrics = if config.metrics_enabled() {
        Some(setup_metrics_recorder().wrap_err("failed to install metrics recorder")?)
    } else {
        None
    };

    if let (Some(port), Some(recorder_handle)) = (config.metrics_port, metrics.clone()) {
        let token = shutdown.token();
        tokio::spawn(async move {
            let bind = format!("0.0.0.0:{port}");
            if let Err(err) = serve(
                metrics_router(recorder_handle),
                &bind,
                token.cancelled_owned(),
            )
            .await
            {
                error!(error = %err, bind = %bind, "failed to serve metrics");
            }
        });
    }

    let sdk = AgonesSdk::connect(&config.sdk.sdk_config(), &shutdown, info_span!("sdk"))
        .await
        .wrap_err("could not connect to the Agones SDK server")?;

    let api = config.api.enabled.then(|| {
        tokio::spawn(serve_api(
            config.api.clone(),
            metrics.clone(),
            shutdown.clone(),
            info_span!("api"),
        ))
    });

    let lifecycle_span = info_span!("lifecycle");
    let manager = LifecycleManager::new(
        lifecycle_config,
        Arc::new(sdk),
        probe_for(
            config.ping_protocol,
            info_span!(parent: &lifecycle_span, "probe"),
        ),
        lifecycle_span,
    );

    run_until_done(&manager, api, &shutdown).await
}

/// Run the lifecycle next to the file API. A failing API stops the lifecycle; a finished
/// lifecycle stops the API.
async fn run_until_done(
    manager: &LifecycleManager,
    api: Option<JoinHandle<Result<(), ServerError>>>,
    shutdown: &Shutdown,
) -> Result<()> {
    let lifecycle = manager.run(shutdown);
    tokio::pin!(lifecycle);

    let (outcome, api) = match api {
        None => (lifecycle.await.map_err(eyre::Report::from), None),
        Some(mut api) => tokio::select! {
            result = &mut lifecycle => (result.map_err(eyre::Report::from), Some(api)),
            result = &mut api => {
                shutdown.trigger("file API stopped");
                if let Err(err) = lifecycle.await {
                    error!(error = %err, "lifecycle ended after file API stopped");
                }
                (Err(api_failure(result)), None)
            }
        },
    };

    shutdown.trigger("lifecycle finished");
    if let Some(api) = api {
        if let Err(err) = api.await.map_err(ServerError::from).and_then(|result| result) {
            error!(error = %err, "file API did not shut down cleanly");
        }
    }

    if outcome.is_ok() {
        info!(reason = %shutdown.reason(), "sidecar stopped gracefully");
    }
    outcome.wrap_err("sidecar lifecycle failed")
}

fn api_failure(result: Result<Result<(), ServerError>, tokio::task::JoinError>) -> eyre::Report {
    match result {
        Ok(Ok(())) => eyre::eyre!("file API stopped unexpectedly"),
        Ok(Err(err)) => eyre::Report::from(err),
        Err(err) => eyre::Report::from(ServerError::from(err)),
    }
}
