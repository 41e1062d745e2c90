//! Development-time tracing for debugging the agent loop.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the run's product output.
//!
//! - **Cycle logging (`io/cycle_log`)**: Product artifacts under the configured
//!   `log_dir`. Always written, unaffected by `RUST_LOG`.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`; unparsable directives are skipped.
/// Compact format on stderr so stdout stays reserved for the console channel
/// and cycle summaries.
///
/// # Example
/// ```bash
/// RUST_LOG=autoloop=debug autoloop run --auto 3
/// ```
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
