use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use sidecar_api::config::ApiConfig;
use sidecar_common::error::LifecycleError;
use sidecar_common::lifecycle::LifecycleConfig;
use sidecar_common::probe::{EndpointTarget, Transport};
use sidecar_common::retry::RetryPolicy;
use sidecar_common::sdk::SdkConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "AGNOSTIC_SIDECAR_INITIAL_DELAY", default = "30s")]
    pub initial_delay: EnvDuration,

    #[envconfig(from = "AGNOSTIC_SIDECAR_HEALTH_INTERVAL", default = "15s")]
    pub health_interval: EnvDuration,

    #[envconfig(from = "AGNOSTIC_SIDECAR_PING_HOST", default = "127.0.0.1")]
    pub ping_host: String,

    #[envconfig(from = "AGNOSTIC_SIDECAR_PING_PORT")]
    pub ping_port: u16,

    #[envconfig(from = "AGNOSTIC_SIDECAR_PING_PROTOCOL", default = "tcp")]
    pub ping_protocol: Transport,

    #[envconfig(from = "AGNOSTIC_SIDECAR_PING_TIMEOUT", default = "5s")]
    pub ping_timeout: EnvDuration,

    #[envconfig(from = "AGNOSTIC_SIDECAR_RETRY_INTERVAL", default = "5s")]
    pub retry_interval: EnvDuration,

    /// Serve `/metrics` on its own port, independently of the file API.
    #[envconfig(from = "AGNOSTIC_SIDECAR_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[envconfig(nested = true)]
    pub sdk: SdkSettings,

    #[envconfig(nested = true)]
    pub api: ApiConfig,
}

impl Config {
    pub fn target(&self) -> EndpointTarget {
        EndpointTarget::new(
            &self.ping_host,
            self.ping_port,
            self.ping_protocol,
            self.ping_timeout.0,
        )
    }

    pub fn lifecycle(&self) -> Result<LifecycleConfig, LifecycleError> {
        LifecycleConfig::new(
            self.initial_delay.0,
            self.health_interval.0,
            self.retry_interval.0,
            self.target(),
        )
    }

    /// Whether a Prometheus recorder has to be installed.
    pub fn metrics_enabled(&self) -> bool {
        self.api.enabled || self.metrics_port.is_some()
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct SdkSettings {
    #[envconfig(from = "AGONES_SDK_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "AGONES_SDK_HTTP_PORT", default = "9358")]
    pub http_port: u16,

    #[envconfig(from = "AGNOSTIC_SIDECAR_SDK_CONNECT_TIMEOUT", default = "30s")]
    pub connect_timeout: EnvDuration,

    #[envconfig(from = "AGNOSTIC_SIDECAR_SDK_REQUEST_TIMEOUT", default = "5s")]
    pub request_timeout: EnvDuration,
}

impl SdkSettings {
    pub fn sdk_config(&self) -> SdkConfig {
        SdkConfig {
            host: self.host.clone(),
            http_port: self.http_port,
            connect_timeout: self.connect_timeout.0,
            request_timeout: self.request_timeout.0,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Duration written as a sequence of decimal numbers with a unit suffix, such as `300ms`,
/// `1.5s` or `1m30s`. Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `0` is accepted; negative durations are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvDurationError;

const NANOS_PER_SEC: u128 = 1_000_000_000;
/// Fractional digits beyond nanosecond precision of an hour are ignored.
const MAX_FRACTION_DIGITS: usize = 13;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3_600 * NANOS_PER_SEC),
        _ => None,
    }
}

impl FromStr for EnvDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "0" {
            return Ok(EnvDuration(time::Duration::ZERO));
        }
        if s.is_empty() {
            return Err(ParseEnvDurationError);
        }

        let mut rest = s;
        let mut total: u128 = 0;

        while !rest.is_empty() {
            let number_end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or(ParseEnvDurationError)?;
            let (number, tail) = rest.split_at(number_end);
            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);

            let unit = unit_nanos(unit).ok_or(ParseEnvDurationError)?;
            total = total
                .checked_add(scale(number, unit)?)
                .ok_or(ParseEnvDurationError)?;
            rest = tail;
        }

        let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| ParseEnvDurationError)?;
        let nanos = u32::try_from(total % NANOS_PER_SEC).map_err(|_| ParseEnvDurationError)?;
        Ok(EnvDuration(time::Duration::new(secs, nanos)))
    }
}

/// `number` (digits with an optional fractional part) times `unit` nanoseconds.
fn scale(number: &str, unit: u128) -> Result<u128, ParseEnvDurationError> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(ParseEnvDurationError);
    }
    if fraction.contains('.') {
        return Err(ParseEnvDurationError);
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| ParseEnvDurationError)?
    };
    let mut nanos = whole.checked_mul(unit).ok_or(ParseEnvDurationError)?;

    let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().map_err(|_| ParseEnvDurationError)?;
        let denominator = 10u128.pow(fraction.len() as u32);
        nanos = nanos
            .checked_add(digits * unit / denominator)
            .ok_or(ParseEnvDurationError)?;
    }

    Ok(nanos)
}
