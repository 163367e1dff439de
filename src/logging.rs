// 📝 Logging - tracing bootstrap for applications embedding the engine
// The library only emits events; installing a subscriber is up to the caller.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber; `RUST_LOG` overrides `default_directive`
pub fn init_logging(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| anyhow!("Invalid log directive '{}': {}", default_directive, e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
