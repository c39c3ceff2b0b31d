//! Logging support.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, EnvFilter};

/// Default log level when `RUST_LOG` is unset.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global `tracing` subscriber. Safe to call more than once;
/// only the first call takes effect.
///
/// # Panics
///
/// If the subscriber fails to install.
pub fn init() {
    static LOGGER: OnceLock<()> = OnceLock::new();
    LOGGER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
        fmt().with_env_filter(filter).with_target(true).init();
    });
}
