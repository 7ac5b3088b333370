#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{sleep, Duration, Instant};

use sidecar_common::error::{ProbeError, SdkError};
use sidecar_common::probe::{EndpointTarget, Probe, ProbeOutcome};
use sidecar_common::sdk::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ProbeFailed,
    ProbeSucceeded,
    Ready,
    Health,
}

/// Shared, ordered record of everything the lifecycle did.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<(Event, Instant)>>>);

impl Timeline {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push((event, Instant::now()));
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().iter().map(|(e, _)| *e).collect()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events().into_iter().filter(|e| *e == event).count()
    }

    pub fn instants(&self, event: Event) -> Vec<Instant> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn record_outcome(&self, outcome: &ProbeOutcome) {
        self.push(if outcome.is_success() {
            Event::ProbeSucceeded
        } else {
            Event::ProbeFailed
        });
    }
}

/// Orchestrator double recording every call on the timeline.
#[derive(Default)]
pub struct RecordingOrchestrator {
    pub timeline: Timeline,
    pub fail_ready: bool,
    pub fail_health: bool,
    pub health_latency: Duration,
}

impl RecordingOrchestrator {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Orchestrator for RecordingOrchestrator {
    async fn ready(&self) -> Result<(), SdkError> {
        self.timeline.push(Event::Ready);
        if self.fail_ready {
            return Err(SdkError::Status {
                call: "ready",
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), SdkError> {
        self.timeline.push(Event::Health);
        sleep(self.health_latency).await;
        if self.fail_health {
            return Err(SdkError::Status {
                call: "health",
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(())
    }
}

/// Probe replaying scripted results; fails once the script runs out.
pub struct ScriptedProbe {
    timeline: Timeline,
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedProbe {
    pub fn new(timeline: Timeline, script: &[bool]) -> Self {
        Self {
            timeline,
            script: Mutex::new(script.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn attempt(&self, target: &EndpointTarget) -> ProbeOutcome {
        let success = self.script.lock().unwrap().pop_front().unwrap_or(false);
        let outcome = if success {
            ProbeOutcome::Success
        } else {
            ProbeOutcome::Failure(ProbeError::NoAddress {
                address: target.address(),
            })
        };
        self.timeline.record_outcome(&outcome);
        outcome
    }
}
