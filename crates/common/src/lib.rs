//! # Conduit Common
//!
//! Shared infrastructure used across conduit crates:
//! - A narrow error type for configuration-level failures
//! - Structured logging (tracing) setup

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_json};
