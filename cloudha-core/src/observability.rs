//! Logging setup and span helpers

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Map a configured level name to a tracing directive
///
/// `silly` is the most verbose level operators know and maps to `trace`.
pub fn level_directive(level: &str) -> &'static str {
    match level {
        "silly" | "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Initialize logging; `RUST_LOG` takes precedence over `level`
///
/// Later calls leave the first subscriber in place.
pub fn init_logging(level: &str) {
    let directive = level_directive(level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,cloudha={d},cloudha_core={d}",
            d = directive
        ))
    });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(directive == "trace")
        .with_line_number(directive == "trace");

    let _ = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Span covering one failover run
#[inline]
pub fn failover_span(run_id: &str) -> Span {
    tracing::info_span!("failover", run_id = %run_id)
}
