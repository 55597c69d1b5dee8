//! Tracing subscriber setup for fleet binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: verbosity used when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
