//! Configuration layer: typed settings with layered precedence (file → env → CLI).
//!
//! [`CacheConfig`] is the interceptor's own configuration and can be embedded
//! by library users directly. [`Settings`] wraps it with what the standalone
//! binary needs to run a proxy.

use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::PersisterConfig;

mod cli;

pub use cli::CliArgs;

pub const DEFAULT_BYPASS_HEADER: &str = "X-Emergency-Cache-Control";
pub const DEFAULT_CACHEABLE_HEADER: &str = "X-Emergency-Cacheable";

const LOCAL_CONFIG_BASENAME: &str = "emergency-cache";
const ENV_PREFIX: &str = "EMERGENCY_CACHE";
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:3000";

/// Interceptor configuration, immutable once the interceptor is built.
///
/// Keys are camelCase (`emergencyMode`, `bypassHeader`, ...). The lowercase
/// aliases accept the same keys after the environment source folds case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Serve from the store instead of the upstream.
    #[serde(alias = "emergencymode")]
    pub emergency_mode: bool,

    /// Store location; see [`open_store`](crate::cache::store::open_store).
    pub path: String,

    /// Request header whose value `no-cache` bypasses the cache entirely.
    #[serde(alias = "bypassheader")]
    pub bypass_header: String,

    /// Response header whose value `true` marks a response as storable.
    #[serde(alias = "cacheableheader")]
    pub cacheable_header: String,

    /// Log every decision with its keys.
    pub debug: bool,

    pub persister: PersisterConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            emergency_mode: false,
            path: String::new(),
            bypass_header: DEFAULT_BYPASS_HEADER.to_owned(),
            cacheable_header: DEFAULT_CACHEABLE_HEADER.to_owned(),
            debug: false,
            persister: PersisterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

/// Fully validated settings for the binary.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub upstream: Url,
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
///
/// An optional `emergency-cache.{toml,yaml,json}` in the working directory is
/// read first, then the `--config-file`, then `EMERGENCY_CACHE__*` variables
/// (`EMERGENCY_CACHE__CACHE__EMERGENCYMODE=true`), then CLI flags.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);
    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    listen: Option<String>,
    upstream: Option<String>,
    cache: CacheConfig,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(listen) = cli.listen.as_ref() {
            self.listen = Some(listen.clone());
        }
        if let Some(upstream) = cli.upstream.as_ref() {
            self.upstream = Some(upstream.clone());
        }
        if let Some(path) = cli.store_path.as_ref() {
            self.cache.path = path.clone();
        }
        if let Some(enabled) = cli.emergency_mode {
            self.cache.emergency_mode = enabled;
        }
        if let Some(debug) = cli.debug {
            self.cache.debug = debug;
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            listen,
            upstream,
            cache,
            logging,
        } = raw;

        let listen = listen.as_deref().unwrap_or(DEFAULT_LISTEN);
        let listen = SocketAddr::from_str(listen.trim())
            .map_err(|err| LoadError::invalid("listen", format!("`{listen}`: {err}")))?;

        let upstream = build_upstream(upstream.as_deref().unwrap_or(DEFAULT_UPSTREAM))?;
        let cache = build_cache_config(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            listen,
            upstream,
            cache,
            logging,
        })
    }
}

fn build_upstream(raw: &str) -> Result<Url, LoadError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| LoadError::invalid("upstream", format!("`{raw}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream",
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }
    if url.host_str().is_none() {
        return Err(LoadError::invalid("upstream", "missing host"));
    }
    Ok(url)
}

fn build_cache_config(mut cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    cache.path = cache.path.trim().to_owned();
    if cache.path.is_empty() {
        return Err(LoadError::invalid("cache.path", "a store location is required"));
    }
    if cache.bypass_header.trim().is_empty() {
        return Err(LoadError::invalid("cache.bypassHeader", "must not be empty"));
    }
    if cache.cacheable_header.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.cacheableHeader",
            "must not be empty",
        ));
    }
    if cache.persister.workers == 0 {
        return Err(LoadError::invalid(
            "cache.persister.workers",
            "must be greater than zero",
        ));
    }
    if cache.persister.queue_capacity == 0 {
        return Err(LoadError::invalid(
            "cache.persister.queueCapacity",
            "must be greater than zero",
        ));
    }
    Ok(cache)
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}
