//! Log output setup for hosts and demos

use playsync_core::{PlaybackError, PlaybackResult};
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, `info` otherwise
pub fn init_logging() -> PlaybackResult<()> {
    init_logging_with("info")
}

/// Install a formatted subscriber, using `default_filter` when `RUST_LOG` is unset
///
/// A subscriber installed earlier stays in place; calling this again is not
/// an error.
pub fn init_logging_with(default_filter: &str) -> PlaybackResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| {
            PlaybackError::config(format!("invalid log filter {:?}: {}", default_filter, e))
        })?,
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging already initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_ok() {
        assert!(init_logging_with("warn").is_ok());
        assert!(init_logging().is_ok());
    }
}
