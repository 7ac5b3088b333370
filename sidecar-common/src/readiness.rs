use std::time;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Instrument, Span};

use crate::metrics::record_probe_attempt;
use crate::probe::{EndpointTarget, Probe, ProbeOutcome};
use crate::shutdown::Shutdown;

/// How a readiness loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A probe succeeded after `attempts` attempts (the successful one included).
    Ready { attempts: u64 },
    /// Shutdown was requested before any probe succeeded.
    Cancelled { reason: String },
}

/// Repeatedly probes an endpoint on a fixed interval until it responds.
///
/// Attempts are strictly sequential and their starts are never closer together than
/// the retry interval. Failed attempts are logged and retried forever: only a success
/// or a shutdown ends the loop.
pub struct ReadinessLoop {
    probe: Box<dyn Probe>,
    retry_interval: time::Duration,
    span: Span,
}

impl ReadinessLoop {
    /// `retry_interval` must be greater than zero.
    pub fn new(probe: Box<dyn Probe>, retry_interval: time::Duration, span: Span) -> Self {
        Self {
            probe,
            retry_interval,
            span,
        }
    }

    pub async fn run(&self, shutdown: &Shutdown, target: &EndpointTarget) -> Readiness {
        self.probe_until_ready(shutdown, target)
            .instrument(self.span.clone())
            .await
    }

    async fn probe_until_ready(&self, shutdown: &Shutdown, target: &EndpointTarget) -> Readiness {
        info!(
            address = %target.address(),
            transport = %target.transport(),
            retry_interval = ?self.retry_interval,
            "starting readiness probe"
        );

        let mut ticker = tokio::time::interval(self.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => return cancelled(shutdown, attempts),
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => return cancelled(shutdown, attempts),
                outcome = self.probe.attempt(target) => outcome,
            };
            record_probe_attempt(target.transport(), outcome.is_success());

            match outcome {
                ProbeOutcome::Success => {
                    info!(attempts, "readiness probe successful");
                    return Readiness::Ready { attempts };
                }
                ProbeOutcome::Failure(error) => {
                    warn!(attempt = attempts, error = %error, "readiness probe attempt failed, retrying");
                }
            }
        }
    }
}

fn cancelled(shutdown: &Shutdown, attempts: u64) -> Readiness {
    let reason = shutdown.reason();
    info!(attempts, reason = %reason, "readiness probe cancelled");
    Readiness::Cancelled { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::time::{sleep, Duration, Instant};

    use crate::error::ProbeError;
    use crate::probe::Transport;

    /// Probe replaying scripted results and recording when each attempt started.
    #[derive(Clone, Default)]
    struct ScriptedProbe {
        script: Arc<Mutex<VecDeque<bool>>>,
        started: Arc<Mutex<Vec<Instant>>>,
        latency: Duration,
    }

    impl ScriptedProbe {
        fn new(script: &[bool]) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                ..Default::default()
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn started(&self) -> Vec<Instant> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn attempt(&self, _target: &EndpointTarget) -> ProbeOutcome {
            self.started.lock().unwrap().push(Instant::now());
            sleep(self.latency).await;
            let success = self.script.lock().unwrap().pop_front().unwrap_or(false);
            if success {
                ProbeOutcome::Success
            } else {
                ProbeOutcome::Failure(ProbeError::NoAddress {
                    address: "scripted".to_owned(),
                })
            }
        }
    }

    fn target() -> EndpointTarget {
        EndpointTarget::new("127.0.0.1", 9999, Transport::Tcp, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_first_success() {
        let probe = ScriptedProbe::new(&[false, false, false, true]);
        let readiness = ReadinessLoop::new(
            Box::new(probe.clone()),
            Duration::from_secs(5),
            Span::none(),
        );

        let result = readiness.run(&Shutdown::new(), &target()).await;

        assert_eq!(result, Readiness::Ready { attempts: 4 });
        assert_eq!(probe.started().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_spaced_by_retry_interval() {
        let retry_interval = Duration::from_secs(2);
        let probe =
            ScriptedProbe::new(&[false, false, false, false, true]).with_latency(Duration::from_millis(700));
        let readiness = ReadinessLoop::new(Box::new(probe.clone()), retry_interval, Span::none());

        readiness.run(&Shutdown::new(), &target()).await;

        let started = probe.started();
        assert_eq!(started.len(), 5);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= retry_interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probes_never_overlap() {
        let retry_interval = Duration::from_secs(1);
        let latency = Duration::from_millis(2500);
        let probe = ScriptedProbe::new(&[false, false, true]).with_latency(latency);
        let readiness = ReadinessLoop::new(Box::new(probe.clone()), retry_interval, Span::none());

        readiness.run(&Shutdown::new(), &target()).await;

        let started = probe.started();
        assert_eq!(started.len(), 3);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= latency);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_attempt_after_cancellation_during_wait() {
        let probe = ScriptedProbe::new(&[]);
        let readiness = ReadinessLoop::new(
            Box::new(probe.clone()),
            Duration::from_secs(5),
            Span::none(),
        );
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            // Two attempts: t=0 and t=5s, cancel while waiting for the third.
            sleep(Duration::from_secs(7)).await;
            trigger.trigger("received SIGTERM");
        });

        let result = readiness.run(&shutdown, &target()).await;

        assert_eq!(
            result,
            Readiness::Cancelled {
                reason: "received SIGTERM".to_owned()
            }
        );
        assert_eq!(probe.started().len(), 2);

        // Nothing else happens afterwards.
        sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.started().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_attempt() {
        let probe = ScriptedProbe::new(&[true]).with_latency(Duration::from_secs(60));
        let readiness = ReadinessLoop::new(
            Box::new(probe.clone()),
            Duration::from_secs(5),
            Span::none(),
        );
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.trigger("test");
        });

        let started = Instant::now();
        let result = readiness.run(&shutdown, &target()).await;

        assert!(matches!(result, Readiness::Cancelled { .. }));
        assert!(Instant::now() - started < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_never_probes() {
        let probe = ScriptedProbe::new(&[true]);
        let readiness = ReadinessLoop::new(
            Box::new(probe.clone()),
            Duration::from_secs(5),
            Span::none(),
        );
        let shutdown = Shutdown::new();
        shutdown.trigger("test");

        let result = readiness.run(&shutdown, &target()).await;

        assert!(matches!(result, Readiness::Cancelled { .. }));
        assert!(probe.started().is_empty());
    }
}
