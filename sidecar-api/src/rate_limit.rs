use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{clock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use metrics::{counter, gauge};
use tracing::debug;

use sidecar_common::shutdown::Shutdown;

use crate::error::{ApiError, ServerError};

const UNKNOWN_CLIENT: &str = "unknown";

/// How often buckets that have refilled completely are dropped.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-client token bucket, refilled at `per_minute` tokens a minute with a burst of the
/// same size. Limits are held in memory, per process.
#[derive(Clone, Debug)]
pub struct ClientRateLimiter {
    limiter: Arc<RateLimiter<String, DefaultKeyedStateStore<String>, clock::DefaultClock>>,
}

impl ClientRateLimiter {
    pub fn new(per_minute: u32) -> Result<Self, ServerError> {
        let per_minute = NonZeroU32::new(per_minute).ok_or(ServerError::ZeroRateLimit)?;
        let quota = Quota::per_minute(per_minute).allow_burst(per_minute);

        Ok(Self::with_quota(quota))
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::dashmap(quota)),
        }
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }

    /// Forget clients whose bucket is full again, and give the memory back.
    pub fn cleanup(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        gauge!("sidecar_api_rate_limiter_entries").set(self.len() as f64);
    }

    pub fn allow_request(&self, client: &str) -> bool {
        let allowed = self.limiter.check_key(&client.to_owned()).is_ok();
        if !allowed {
            counter!("sidecar_api_rate_limited_total").increment(1);
        }
        allowed
    }
}

/// Run [`ClientRateLimiter::cleanup`] every `every` until shutdown. Client keys come from
/// request headers, so the store would otherwise grow with every new value.
pub async fn run_cleanup(limiter: ClientRateLimiter, every: Duration, shutdown: Shutdown) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            _ = interval.tick() => {
                limiter.cleanup();
                debug!(entries = limiter.len(), "cleaned up rate limiter state");
            }
        }
    }
}

/// Identify the client: first `X-Forwarded-For` entry, else the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (forwarded, peer) {
        (Some(forwarded), _) => forwarded.to_owned(),
        (None, Some(peer)) => peer.to_string(),
        (None, None) => UNKNOWN_CLIENT.to_owned(),
    }
}

/// Middleware rejecting clients over their limit with 429. `/health` is never limited.
pub async fn rate_limit(
    State(limiter): State<ClientRateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = client_key(req.headers(), peer);

    if !limiter.allow_request(&client) {
        tracing::warn!(client = %client, "rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }

    next.run(req).await
}
