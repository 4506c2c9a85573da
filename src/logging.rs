//! Global tracing subscriber for the binary.

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, fmt,
    filter::{Directive, ParseError},
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::{LogFormat, LoggingSettings};

/// Directive enabling decision diagnostics for this crate only.
const CRATE_DEBUG_DIRECTIVE: &str = "emergency_cache=debug";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log directive: {0}")]
    Directive(#[from] ParseError),
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level,
/// raised to `debug` for this crate when `cache_debug` is on.
pub fn env_filter(logging: &LoggingSettings, cache_debug: bool) -> Result<EnvFilter, LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    if cache_debug && std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        let directive: Directive = CRATE_DEBUG_DIRECTIVE.parse()?;
        return Ok(filter.add_directive(directive));
    }
    Ok(filter)
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings, cache_debug: bool) -> Result<(), LoggingError> {
    let env_filter = env_filter(logging, cache_debug)?;

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn debug_flag_raises_crate_level() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        let logging = LoggingSettings {
            level: LevelFilter::WARN,
            format: LogFormat::Compact,
        };

        let quiet = env_filter(&logging, false).unwrap().to_string();
        let loud = env_filter(&logging, true).unwrap().to_string();

        assert!(!quiet.contains(CRATE_DEBUG_DIRECTIVE));
        assert!(loud.contains(CRATE_DEBUG_DIRECTIVE));
    }
}
