//! Tracing subscriber bootstrap.
//!
//! Installs a global `tracing` subscriber once per process. The filter comes
//! from `VOICEGATE_LOG` when set, otherwise from the configured level, so
//! operators can raise verbosity per-target without recompiling.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber. Safe to call repeatedly; only the first
/// call has any effect.
pub fn init_tracing(level: &str) {
    let directive = level.to_string();
    TRACING_INIT.get_or_init(move || {
        let filter = EnvFilter::try_from_env("VOICEGATE_LOG")
            .unwrap_or_else(|_| EnvFilter::new(directive));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
