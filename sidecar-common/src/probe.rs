use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, Instrument, Span};

use crate::error::ProbeError;

/// Bytes written to the target by the UDP probe.
pub const UDP_PROBE_PAYLOAD: &[u8] = b"ping";

const UDP_READ_BUFFER_SIZE: usize = 1024;

/// Network protocol used to reach the game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            _ => Err(ProbeError::UnsupportedTransport(s.to_owned())),
        }
    }
}

/// What to probe, and how long a single dial may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTarget {
    host: String,
    port: u16,
    transport: Transport,
    dial_timeout: time::Duration,
}

impl EndpointTarget {
    pub fn new(host: &str, port: u16, transport: Transport, dial_timeout: time::Duration) -> Self {
        Self {
            host: host.to_owned(),
            port,
            transport,
            dial_timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn dial_timeout(&self) -> time::Duration {
        self.dial_timeout
    }

    /// `host:port`, with IPv6 literals wrapped in brackets.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Result of one probe attempt.
#[derive(Debug)]
pub enum ProbeOutcome {
    Success,
    Failure(ProbeError),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            ProbeOutcome::Success => None,
            ProbeOutcome::Failure(error) => Some(error),
        }
    }
}

impl From<Result<(), ProbeError>> for ProbeOutcome {
    fn from(result: Result<(), ProbeError>) -> Self {
        match result {
            Ok(()) => ProbeOutcome::Success,
            Err(error) => ProbeOutcome::Failure(error),
        }
    }
}

/// A single, time-bounded connectivity check against an endpoint.
///
/// Implementations never retry: a failed attempt is reported as-is and retrying is
/// left to the caller.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn attempt(&self, target: &EndpointTarget) -> ProbeOutcome;
}

/// Build the probe matching a transport. Events are emitted inside `span`.
pub fn probe_for(transport: Transport, span: Span) -> Box<dyn Probe> {
    match transport {
        Transport::Tcp => Box::new(TcpProbe::new(span)),
        Transport::Udp => Box::new(UdpProbe::new(span)),
    }
}

/// Succeeds when a TCP connection can be established. The connection is closed
/// right away, no data is exchanged.
pub struct TcpProbe {
    span: Span,
}

impl TcpProbe {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    async fn dial(&self, target: &EndpointTarget) -> Result<(), ProbeError> {
        let address = target.address();

        let stream = bounded(
            &address,
            target.dial_timeout(),
            TcpStream::connect(&address),
            |address, source| ProbeError::Connect { address, source },
        )
        .await?;

        debug!(address = %address, "tcp connection established");
        drop(stream);
        Ok(())
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn attempt(&self, target: &EndpointTarget) -> ProbeOutcome {
        self.dial(target).instrument(self.span.clone()).await.into()
    }
}

/// Succeeds as soon as the probe payload is written to a connected datagram socket.
///
/// UDP has no handshake, and most game protocols ignore unsolicited datagrams, so a
/// reply is read for diagnostics only: whether one arrives never changes the outcome.
pub struct UdpProbe {
    span: Span,
}

impl UdpProbe {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    async fn send_ping(&self, target: &EndpointTarget) -> Result<(), ProbeError> {
        let address = target.address();
        let remote = resolve(&address, target.dial_timeout()).await?;

        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| ProbeError::Connect {
                address: address.clone(),
                source,
            })?;
        socket
            .connect(remote)
            .await
            .map_err(|source| ProbeError::Connect {
                address: address.clone(),
                source,
            })?;

        bounded(
            &address,
            target.dial_timeout(),
            socket.send(UDP_PROBE_PAYLOAD),
            |address, source| ProbeError::Write { address, source },
        )
        .await?;

        read_reply(&socket, target.dial_timeout()).await;
        Ok(())
    }
}

#[async_trait]
impl Probe for UdpProbe {
    async fn attempt(&self, target: &EndpointTarget) -> ProbeOutcome {
        self.send_ping(target)
            .instrument(self.span.clone())
            .await
            .into()
    }
}

async fn resolve(address: &str, dial_timeout: time::Duration) -> Result<SocketAddr, ProbeError> {
    let mut addresses = bounded(
        address,
        dial_timeout,
        lookup_host(address),
        |address, source| ProbeError::Resolve { address, source },
    )
    .await?;

    addresses.next().ok_or_else(|| ProbeError::NoAddress {
        address: address.to_owned(),
    })
}

/// Await one network step for at most `limit`. I/O errors are wrapped by `on_error`.
async fn bounded<T>(
    address: &str,
    limit: time::Duration,
    step: impl Future<Output = io::Result<T>>,
    on_error: impl FnOnce(String, io::Error) -> ProbeError,
) -> Result<T, ProbeError> {
    match timeout(limit, step).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(on_error(address.to_owned(), source)),
        Err(_) => Err(ProbeError::Timeout {
            address: address.to_owned(),
            timeout: limit,
        }),
    }
}

async fn read_reply(socket: &UdpSocket, read_timeout: time::Duration) {
    let mut buf = [0u8; UDP_READ_BUFFER_SIZE];

    match timeout(read_timeout, socket.recv(&mut buf)).await {
        Ok(Ok(bytes)) => debug!(bytes, "received response from udp target"),
        Ok(Err(error)) => debug!(
            error = %error,
            "no response from udp target (expected for many services)"
        ),
        Err(_) => debug!("udp target stayed silent within the read timeout"),
    }
}
