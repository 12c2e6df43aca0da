//! Logging setup and span helpers
//!
//! `RUST_LOG` controls levels (default `info`).

use std::sync::Once;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    #[default]
    Pretty,
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Logs go to stderr so command output on stdout stays machine-readable
        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init(),
        };
        if let Err(e) = result {
            eprintln!("Warning: logging already initialised: {e}");
        }
    });
}

/// Span wrapping one pipeline use case
#[must_use]
pub fn pipeline_span(stage: &str, target: &str) -> Span {
    tracing::info_span!("pipeline", stage = stage, target = target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_pipeline_span() {
        let span = pipeline_span("backfill", "2018-12-31T00:00:00");
        let _guard = span.enter();
        tracing::info!("inside span");
    }
}
