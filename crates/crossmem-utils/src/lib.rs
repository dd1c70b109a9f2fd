//! # crossmem Utilities
//!
//! Shared helpers for the crossmem workspace: `tracing` logging setup and
//! the hex parsing/formatting the CLI needs.

pub mod hex;
pub mod logging;

// Re-export commonly used items for convenience
pub use hex::{format_hexdump, parse_address, parse_hex_bytes, ParseError};
pub use logging::{
    default_log_file, init_logging, init_logging_with, init_logging_with_level, LogConfig, LogFormat, LogLevel,
    LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
