//! Shared error type for conduit crates.
//!
//! Crate-specific errors (Redis protocol, codec, dispatch) live in their own
//! crates; this is the narrow slice shared by config loading and anything
//! that doesn't deserve its own enum variant.

use thiserror::Error;

/// Generic error type for infrastructure concerns shared across crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing/invalid environment variables).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors wrapped from anyhow-using call sites.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for conduit-common operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("REDIS_HOST not set".to_string());
        assert_eq!(err.to_string(), "Configuration error: REDIS_HOST not set");
    }
}
