use std::io;
use std::time;

use thiserror::Error;

/// Enumeration of the reasons a single readiness probe attempt can fail.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
    #[error("could not resolve {address}: {source}")]
    Resolve { address: String, source: io::Error },
    #[error("{address} did not resolve to any socket address")]
    NoAddress { address: String },
    #[error("could not connect to {address}: {source}")]
    Connect { address: String, source: io::Error },
    #[error("timed out after {timeout:?} while dialing {address}")]
    Timeout {
        address: String,
        timeout: time::Duration,
    },
    #[error("could not write probe payload to {address}: {source}")]
    Write { address: String, source: io::Error },
}

impl ProbeError {
    /// True when the target host answered, but nothing was listening on the port.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            ProbeError::Connect { source, .. } | ProbeError::Write { source, .. } => {
                source.kind() == io::ErrorKind::ConnectionRefused
            }
            _ => false,
        }
    }
}

/// Enumeration of errors returned by the orchestrator SDK client.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("failed to build the SDK http client")]
    Client(#[source] reqwest::Error),
    #[error("{call} request to the SDK server failed: {source}")]
    Request {
        call: &'static str,
        source: reqwest::Error,
    },
    #[error("{call} request was rejected by the SDK server with status {status}")]
    Status {
        call: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("could not connect to the SDK server at {url} within {timeout:?}: {source}")]
    ConnectTimeout {
        url: String,
        timeout: time::Duration,
        source: Box<SdkError>,
    },
    #[error("shutdown requested while connecting to the SDK server")]
    ConnectCancelled,
}

/// Enumeration of the fatal outcomes of a lifecycle run.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },
    #[error("readiness probe did not succeed before shutdown: {reason}")]
    NotReady { reason: String },
    #[error("failed to send Ready signal")]
    ReadySignal(#[source] SdkError),
}
