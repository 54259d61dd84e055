//! Tracing initialization
//!
//! Structured logging via `tracing-subscriber`, with the level taken from
//! `RUST_LOG` (falling back to `LOG_LEVEL`) and an optional JSON output
//! format for log aggregation.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Safe to call once at process start; later calls are ignored.
pub fn init_tracing() {
    let default_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_lowercase()));

    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_format {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}
