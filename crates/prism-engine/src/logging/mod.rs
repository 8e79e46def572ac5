//! Logging utilities.
//!
//! Everything in prism logs through the `log` facade; this module only owns
//! backend initialization for binaries and tests that want output.

mod init;

pub use init::{init_logging, LoggingConfig};
