//! # Retrace Utilities
//!
//! Shared utilities and logging for Retrace.
//!
//! The core library only emits `tracing` events; this crate decides where
//! they go. Binaries call [`init_logging`] once at startup.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    expand_log_path, init_logging, init_logging_from_env, LogFormat, LogLevel, LoggingConfig, LoggingError,
};
pub use tracing::{debug, error, info, trace, warn};
