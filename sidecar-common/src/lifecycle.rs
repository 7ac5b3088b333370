//! Drives a game server from "just started" to "ready", then keeps it alive.
//!
//! The manager walks a one-directional state machine:
//!
//! ```text
//! Delaying -> Probing -> Ready -> HealthChecking -> Terminated
//!     |           |        |
//!     |           +--------+--> Failed
//!     +--> Terminated
//! ```
//!
//! Every wait races the shared [`Shutdown`] signal. Once shutdown is observed no further
//! calls are made to the orchestrator.

use std::fmt;
use std::sync::Arc;
use std::time;

use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::error::LifecycleError;
use crate::metrics::{record_phase, record_sdk_call};
use crate::probe::{EndpointTarget, Probe};
use crate::readiness::{Readiness, ReadinessLoop};
use crate::sdk::Orchestrator;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Delaying,
    Probing,
    Ready,
    HealthChecking,
    Terminated,
    Failed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Delaying => "delaying",
            LifecyclePhase::Probing => "probing",
            LifecyclePhase::Ready => "ready",
            LifecyclePhase::HealthChecking => "health_checking",
            LifecyclePhase::Terminated => "terminated",
            LifecyclePhase::Failed => "failed",
        }
    }

    /// Stable numeric value, exported as a gauge.
    pub fn ordinal(&self) -> u8 {
        match self {
            LifecyclePhase::Delaying => 0,
            LifecyclePhase::Probing => 1,
            LifecyclePhase::Ready => 2,
            LifecyclePhase::HealthChecking => 3,
            LifecyclePhase::Terminated => 4,
            LifecyclePhase::Failed => 5,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, LifecyclePhase::Terminated | LifecyclePhase::Failed)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timings and target of a lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    initial_delay: time::Duration,
    health_interval: time::Duration,
    retry_interval: time::Duration,
    target: EndpointTarget,
}

impl LifecycleConfig {
    /// Both intervals drive periodic timers and must be greater than zero.
    pub fn new(
        initial_delay: time::Duration,
        health_interval: time::Duration,
        retry_interval: time::Duration,
        target: EndpointTarget,
    ) -> Result<Self, LifecycleError> {
        if health_interval.is_zero() {
            return Err(LifecycleError::ZeroInterval {
                name: "health interval",
            });
        }
        if retry_interval.is_zero() {
            return Err(LifecycleError::ZeroInterval {
                name: "retry interval",
            });
        }

        Ok(Self {
            initial_delay,
            health_interval,
            retry_interval,
            target,
        })
    }

    pub fn initial_delay(&self) -> time::Duration {
        self.initial_delay
    }

    pub fn health_interval(&self) -> time::Duration {
        self.health_interval
    }

    pub fn retry_interval(&self) -> time::Duration {
        self.retry_interval
    }

    pub fn target(&self) -> &EndpointTarget {
        &self.target
    }
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    orchestrator: Arc<dyn Orchestrator>,
    readiness: ReadinessLoop,
    phase: watch::Sender<LifecyclePhase>,
    span: Span,
}

impl LifecycleManager {
    /// All events of the run, the readiness loop's included, are emitted inside `span`.
    pub fn new(
        config: LifecycleConfig,
        orchestrator: Arc<dyn Orchestrator>,
        probe: Box<dyn Probe>,
        span: Span,
    ) -> Self {
        let readiness = ReadinessLoop::new(
            probe,
            config.retry_interval,
            info_span!(parent: &span, "readiness"),
        );
        let (phase, _) = watch::channel(LifecyclePhase::Delaying);

        Self {
            config,
            orchestrator,
            readiness,
            phase,
            span,
        }
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Run the whole lifecycle. Returns `Ok` when shutdown ends the run gracefully
    /// (during the initial delay or while health checking), and an error when the
    /// server never became ready or the ready signal could not be delivered.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), LifecycleError> {
        self.drive(shutdown).instrument(self.span.clone()).await
    }

    async fn drive(&self, shutdown: &Shutdown) -> Result<(), LifecycleError> {
        self.enter(LifecyclePhase::Delaying);
        info!(duration = ?self.config.initial_delay, "waiting for initial delay before probing");
        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                info!(reason = %shutdown.reason(), "shutdown requested during initial delay");
                self.enter(LifecyclePhase::Terminated);
                return Ok(());
            }
            _ = sleep(self.config.initial_delay) => {}
        }

        self.enter(LifecyclePhase::Probing);
        match self.readiness.run(shutdown, &self.config.target).await {
            Readiness::Ready { attempts } => debug!(attempts, "game server is reachable"),
            Readiness::Cancelled { reason } => {
                error!(
                    reason = %reason,
                    "readiness probe cancelled, game server will not be marked as Ready"
                );
                self.enter(LifecyclePhase::Failed);
                return Err(LifecycleError::NotReady { reason });
            }
        }

        self.enter(LifecyclePhase::Ready);
        let ready = self.orchestrator.ready().await;
        record_sdk_call("ready", ready.is_ok());
        if let Err(err) = ready {
            error!(error = %err, "failed to send Ready signal");
            self.enter(LifecyclePhase::Failed);
            return Err(LifecycleError::ReadySignal(err));
        }
        info!(">>> Server is Ready! Starting health checks. <<<");

        self.enter(LifecyclePhase::HealthChecking);
        self.heartbeat(shutdown).await;

        self.enter(LifecyclePhase::Terminated);
        Ok(())
    }

    /// Send a health ping on every tick until shutdown. Failed pings are only logged: the
    /// orchestrator marks the server unhealthy on its own once pings stop arriving.
    async fn heartbeat(&self, shutdown: &Shutdown) {
        let period = self.config.health_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!(reason = %shutdown.reason(), "shutdown signal received, stopping health checks");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let health = self.orchestrator.health().await;
            record_sdk_call("health", health.is_ok());
            match health {
                Ok(()) => debug!("health ping sent successfully"),
                Err(err) => warn!(error = %err, "failed to send health ping"),
            }
        }
    }

    fn enter(&self, phase: LifecyclePhase) {
        let previous = self.phase.send_replace(phase);
        record_phase(phase);
        if previous != phase {
            info!(from = %previous, to = %phase, "lifecycle phase changed");
        }
    }
}
