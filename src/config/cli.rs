use std::path::PathBuf;

use clap::{Parser, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the emergency-cache binary.
///
/// Every flag is optional and, when present, overrides the configuration
/// file and the `EMERGENCY_CACHE__*` environment.
#[derive(Debug, Default, Parser)]
#[command(
    name = "emergency-cache",
    version,
    about = "Caching reverse proxy that keeps serving when the origin cannot"
)]
pub struct CliArgs {
    /// Optional path to a configuration file (TOML, YAML or JSON).
    #[arg(
        long = "config-file",
        env = "EMERGENCY_CACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    /// Address to accept client connections on.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Origin server to forward requests to.
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url)]
    pub upstream: Option<String>,

    /// Store location: an `http://` base URL, a directory, or `memory:`.
    #[arg(long = "store-path", value_name = "LOCATION")]
    pub store_path: Option<String>,

    /// Serve from the store instead of the origin.
    #[arg(
        long = "emergency-mode",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub emergency_mode: Option<bool>,

    /// Log every cache decision.
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
