//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_DIRECTIVE);
}

/// Tracing configuration (filters, formatter).
pub mod tracing;
