//! Tracing/logging initialization.
//!
//! JSON lines on stdout, one object per event, with the span fields of the
//! current run (`run_id`, `function_id`, ...) flattened in.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Build the level filter from `RUST_LOG`, falling back to `default`.
pub fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global JSON subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default))
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init(DEFAULT_DIRECTIVE);
        init("debug");
        ::tracing::info!("still logging");
    }

    #[test]
    fn fallback_filter_parses() {
        let filter = EnvFilter::new("carrion_infra=debug,info");
        assert!(filter.to_string().contains("carrion_infra=debug"));
    }
}
