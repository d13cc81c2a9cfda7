//! Structured logging setup. A trimmed-down version of the
//! teacher's observability stack: `EnvFilter` + a single `fmt` layer,
//! switchable between pretty (development) and JSON (production) output.
//! OpenTelemetry export and file rotation are out of scope for a library
//! with no long-running server process to instrument.

use crate::config::LogFormat;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global `tracing` subscriber once per process. Safe to
/// call more than once in tests; subsequent calls are no-ops.
pub fn init(format: LogFormat, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).with_level(true);
            tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true).with_level(true);
            tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()
        }
    };

    // A second `init` in the same process (e.g. across tests in one binary)
    // is expected and not a failure; only surface genuinely unexpected errors.
    if let Err(err) = result {
        if !err.to_string().contains("already been set") {
            return Err(anyhow::anyhow!(err));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(LogFormat::Pretty, "info").unwrap();
        init(LogFormat::Json, "debug").unwrap();
    }
}
