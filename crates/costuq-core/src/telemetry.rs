//! Centralised tracing initialisation for costuq binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting.
//!
//! Only the first call takes effect; the global subscriber can be set once
//! per process.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// At `DEBUG` and below, closing analysis spans are logged with their
/// busy/idle timings.
pub fn init_tracing(json: bool, level: Level) {
    let span_events = if level >= Level::DEBUG {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if json {
        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_span_events(span_events)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(fmt::layer().with_target(false).with_span_events(span_events))
            .try_init()
            .ok();
    }
}

/// `RUST_LOG` wins over the supplied default level.
fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
    }
}
