//! Logging set-up
//!
//! The library only emits `tracing` events; binaries call [`init`] once.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::types::{MirrorError, Result};

/// Default filter directive for a log level
pub fn default_directive(log_level: &str) -> String {
    format!("migrate_onwrite={},info", log_level)
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `log_level`.
pub fn init(log_level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    installed.map_err(|e| MirrorError::Config(format!("Failed to initialise logging: {}", e)))
}
