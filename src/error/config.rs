// Configuration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 1001-1007
pub struct ConfigErrorCodes;

impl ConfigErrorCodes {
    /// Band edges violate `0 < low < high < sample_rate / 2`
    pub const INVALID_BAND: i32 = 1001;

    /// Weak threshold multiplier exceeds the strong one
    pub const INVALID_THRESHOLD: i32 = 1002;

    /// A scalar option is out of its accepted range
    pub const INVALID_PARAMETER: i32 = 1003;

    /// Channel adjacency graph is inconsistent
    pub const INVALID_PROBE: i32 = 1004;

    /// A configuration or probe file could not be read
    pub const UNREADABLE: i32 = 1005;

    /// A configuration or probe file could not be parsed
    pub const MALFORMED: i32 = 1006;

    /// Input recording format is not supported
    pub const UNSUPPORTED_FORMAT: i32 = 1007;
}

/// Log a configuration error with structured context
///
/// This function logs configuration errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=Configuration, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Configuration-related errors
///
/// All of these are fatal: they are raised before any chunk is read so a
/// run never starts with an undefined filter or calibration.
///
/// Error code range: 1001-1007
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Band-pass edges are not strictly inside (0, nyquist)
    InvalidBand { low: f64, high: f64, nyquist: f64 },

    /// Weak threshold would be above the strong threshold
    InvalidThreshold { strong: f64, weak: f64 },

    /// Generic out-of-range option
    InvalidParameter { name: String, reason: String },

    /// Probe adjacency graph references unknown channels or itself
    InvalidProbe { reason: String },

    /// File could not be read from disk
    Unreadable { path: String, reason: String },

    /// File contents are not valid JSON for the expected schema
    Malformed { path: String, reason: String },

    /// Input recording cannot be decoded
    UnsupportedFormat { reason: String },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidParameter`]
    pub fn parameter(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::InvalidBand { .. } => ConfigErrorCodes::INVALID_BAND,
            ConfigError::InvalidThreshold { .. } => ConfigErrorCodes::INVALID_THRESHOLD,
            ConfigError::InvalidParameter { .. } => ConfigErrorCodes::INVALID_PARAMETER,
            ConfigError::InvalidProbe { .. } => ConfigErrorCodes::INVALID_PROBE,
            ConfigError::Unreadable { .. } => ConfigErrorCodes::UNREADABLE,
            ConfigError::Malformed { .. } => ConfigErrorCodes::MALFORMED,
            ConfigError::UnsupportedFormat { .. } => ConfigErrorCodes::UNSUPPORTED_FORMAT,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::InvalidBand { low, high, nyquist } => format!(
                "Invalid band: need 0 < low < high < {} Hz (got low={}, high={})",
                nyquist, low, high
            ),
            ConfigError::InvalidThreshold { strong, weak } => format!(
                "Invalid threshold: weak multiplier {} exceeds strong multiplier {}",
                weak, strong
            ),
            ConfigError::InvalidParameter { name, reason } => {
                format!("Invalid parameter {}: {}", name, reason)
            }
            ConfigError::InvalidProbe { reason } => format!("Invalid probe: {}", reason),
            ConfigError::Unreadable { path, reason } => {
                format!("Cannot read {}: {}", path, reason)
            }
            ConfigError::Malformed { path, reason } => {
                format!("Cannot parse {}: {}", path, reason)
            }
            ConfigError::UnsupportedFormat { reason } => {
                format!("Unsupported recording format: {}", reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_codes() {
        assert_eq!(
            ConfigError::InvalidBand {
                low: 0.0,
                high: 1.0,
                nyquist: 2.0
            }
            .code(),
            ConfigErrorCodes::INVALID_BAND
        );
        assert_eq!(
            ConfigError::InvalidThreshold {
                strong: 2.0,
                weak: 4.0
            }
            .code(),
            1002
        );
        assert_eq!(ConfigError::parameter("chunk_size", "zero").code(), 1003);
        assert_eq!(
            ConfigError::InvalidProbe {
                reason: "test".to_string()
            }
            .code(),
            1004
        );
        assert_eq!(
            ConfigError::UnsupportedFormat {
                reason: "test".to_string()
            }
            .code(),
            1007
        );
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::InvalidBand {
            low: 6000.0,
            high: 500.0,
            nyquist: 10000.0,
        };
        assert!(err.message().contains("low=6000"));
        assert!(err.message().contains("high=500"));

        let err = ConfigError::parameter("chunk_overlap", "must be smaller than chunk_size");
        assert_eq!(
            err.message(),
            "Invalid parameter chunk_overlap: must be smaller than chunk_size"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidThreshold {
            strong: 2.0,
            weak: 4.5,
        };
        let display = format!("{}", err);
        assert!(display.contains("ConfigError"));
        assert!(display.contains("1002"));
    }
}
