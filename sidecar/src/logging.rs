use std::str::FromStr;

use envconfig::Envconfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLogFormatError;

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(ParseLogFormatError),
        }
    }
}

/// Read before everything else so that configuration errors are logged in the right format.
#[derive(Envconfig, Clone, Debug)]
pub struct LogConfig {
    #[envconfig(from = "AGNOSTIC_SIDECAR_LOG_FORMAT", default = "json")]
    pub format: LogFormat,
}

/// Install the global subscriber. The level filter comes from `RUST_LOG`, `info` by default.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_log_format() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("xml".parse::<LogFormat>(), Err(ParseLogFormatError));
    }

    #[test]
    fn test_default_is_json() {
        let config = LogConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.format, LogFormat::Json);
    }
}
