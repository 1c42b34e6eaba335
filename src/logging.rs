//! Tracing subscriber setup
//!
//! Events carry structured fields (`worker`, `session`, `volume`, `lock`,
//! `resource_type`) so fetch decisions can be followed across a fleet.

use crate::config::GeneralConfig;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parse from the `log_format` config value; unknown values fall back to text
    pub fn from_config(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Default filter directive for a verbosity level: 0 = warn, 1 = info, 2+ = debug
pub fn filter_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "resfetch=warn",
        1 => "resfetch=info",
        _ => "resfetch=debug",
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the verbosity from config. Calling this twice is a
/// no-op for the second call.
pub fn init(config: &GeneralConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config.verbose)));

    let result = match LogFormat::from_config(&config.log_format) {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    // A subscriber installed by the embedding process wins.
    let _ = result;
}
