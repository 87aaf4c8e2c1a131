// Error types for the spike detection pipeline
//
// This module defines custom error types for configuration and detection
// operations, providing structured error handling with stable numeric codes
// that the CLI and log output can report.

mod config;
mod detection;

pub use config::{log_config_error, ConfigError, ConfigErrorCodes};
pub use detection::{log_detection_error, DetectionError, DetectionErrorCodes, WindowEdge};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the library and the command line front-end.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
