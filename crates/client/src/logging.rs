//! Tracing setup for the `mzad-live` binary.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to whoever hosts the client.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVE: &str = "mzad_live=debug";

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_DIRECTIVE`]. Calling it twice is harmless.
pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

pub fn init_with(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .try_init();
}
