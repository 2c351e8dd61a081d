use anyhow::{Error, Result, anyhow};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default;
/// production emits flattened JSON lines.
pub fn init_tracing(is_production: bool) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if is_production {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}
