//! Log subscriber for the CLI and tests. Library code only emits `tracing` events.
//!
//! The filter comes from `RUST_LOG` when set. Otherwise beeconnect events at
//! `info` and everything else at `warn`, so provider and runtime chatter stays
//! out of CLI output. `BEECONNECT_LOG_FORMAT` picks `text` (default),
//! `pretty` or `json`; `BEECONNECT_LOG_JSON=1` is accepted as `json`.

use crate::core::keys::env;
use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "beeconnect=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line, no targets.
    #[default]
    Text,
    /// Multi-line with source locations.
    Pretty,
    /// JSON lines.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "compact" => Ok(LogFormat::Text),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub default_directives: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { format: LogFormat::default(), default_directives: DEFAULT_DIRECTIVES.to_string() }
    }
}

impl LogConfig {
    /// Format from the environment, default directives otherwise.
    pub fn from_env() -> Self {
        let format = std::env::var(env::LOG_FORMAT).ok();
        let json_flag = std::env::var(env::LOG_JSON).ok();
        Self { format: resolve_format(format.as_deref(), json_flag.as_deref()), ..Self::default() }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self { self.format = format; self }

    pub fn with_default_directives(mut self, directives: impl Into<String>) -> Self {
        self.default_directives = directives.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_directives))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
    }
}

/// An explicit format wins; an unknown one falls back to text. The legacy
/// JSON flag only applies when no format is named.
fn resolve_format(format: Option<&str>, json_flag: Option<&str>) -> LogFormat {
    match format {
        Some(name) => name.parse().unwrap_or_default(),
        None if json_flag == Some("1") => LogFormat::Json,
        None => LogFormat::Text,
    }
}

/// Install a stderr subscriber configured from the environment.
pub fn init_logging() {
    init_logging_with(&LogConfig::from_env());
}

/// Install a stderr subscriber. A second call is a no-op.
pub fn init_logging_with(config: &LogConfig) {
    let builder = fmt::Subscriber::builder().with_env_filter(config.filter()).with_writer(std::io::stderr);
    let _ = match config.format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
