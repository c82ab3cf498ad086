//! Structured logging configuration.
//!
//! Installs a `tracing` subscriber for the CLI. Library code logs through the
//! `log` facade; those records are bridged into the same subscriber.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `--log` nor `RUST_LOG` is given
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialize structured logging
///
/// Output goes to stderr so command results on stdout stay machine-readable.
///
/// # Arguments
///
/// * `filter` - Explicit filter directive (from `--log`); overrides `RUST_LOG`
pub fn init(filter: Option<&str>) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(build_filter(filter))
        .with(fmt_layer)
        .init();

    tracing::debug!("Structured logging initialized");
}

/// Resolve the filter: explicit directive, then `RUST_LOG`, then the default
fn build_filter(filter: Option<&str>) -> EnvFilter {
    filter
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
