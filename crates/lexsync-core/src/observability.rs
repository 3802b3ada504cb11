//! Tracing setup.
//!
//! ## Log level contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | WARN  | Recoverable failure: failed attempt, lost channel, failed poll, version conflict |
//! | INFO  | Lifecycle: channel connected/closed, fallback polling on/off, server changes, restored drafts |
//! | DEBUG | Decision points: stale tickets, state transitions, ignored frames, draft saves |
//!
//! Structured fields used across the crate: `resource`, `ticket`, `attempt`,
//! `entity_type`, `entity_id`, `version`, `draft`, `error`.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a fmt subscriber. `RUST_LOG` overrides `default_directive`.
///
/// Returns an error when a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}
