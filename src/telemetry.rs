//! Global tracing setup for test harnesses and examples.
//!
//! Library code never calls this implicitly — the engine and proposers only ever
//! call into `tracing`'s ambient macros, never install a subscriber themselves.

use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "gepa_core=debug";
static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid tracing filter directive `{directive}`: {source}")]
    InvalidFilter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs a process-global tracing subscriber.
///
/// Behavior:
/// - Uses `RUST_LOG` when present.
/// - Falls back to `gepa_core=debug` when `RUST_LOG` is unset/invalid.
/// - Is idempotent: repeated calls are no-ops after the first successful init.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    if TRACING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = resolve_filter()?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    let _ = TRACING_INITIALIZED.set(());
    Ok(())
}

fn resolve_filter() -> Result<EnvFilter, TelemetryInitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER).map_err(|source| {
            TelemetryInitError::InvalidFilter {
                directive: DEFAULT_FILTER.to_string(),
                source,
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_idempotent() {
        assert!(init_tracing().is_ok());
        assert!(init_tracing().is_ok());
    }
}
