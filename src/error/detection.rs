// Detection error types and constants

use crate::error::{ConfigError, ErrorCode};
use log::error;
use std::fmt;

/// Detection error code constants
///
/// Error code range: 2001-2009
pub struct DetectionErrorCodes;

impl DetectionErrorCodes {
    /// Waveform window runs past the available samples
    pub const INCOMPLETE_WINDOW: i32 = 2001;

    /// Feature projection attempted before the basis was fit
    pub const BASIS_NOT_FIT: i32 = 2002;

    /// Two-phase fit protocol used out of order
    pub const INVALID_PHASE: i32 = 2003;

    /// Not enough waveforms collected to fit the feature basis
    pub const INSUFFICIENT_WAVEFORMS: i32 = 2004;

    /// Eigen-decomposition did not converge
    pub const CONVERGENCE_FAILED: i32 = 2005;

    /// Chunk contained non-finite samples and was skipped
    pub const CORRUPT_CHUNK: i32 = 2006;

    /// Raw data source failed
    pub const SOURCE: i32 = 2007;

    /// Output sink failed
    pub const SINK: i32 = 2008;

    /// Wrapped configuration error
    pub const CONFIG: i32 = 2009;
}

/// Side of the waveform window that ran out of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEdge {
    /// Window starts before the first available sample
    Leading,
    /// Window ends after the last available sample
    Trailing,
}

/// Log a detection error with structured context
///
/// This function logs detection errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_detection_error(err: &DetectionError, context: &str) {
    error!(
        "Detection error in {}: code={}, component=Pipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Detection-related errors
///
/// `IncompleteWindow` is recoverable (the spike is re-extracted once more
/// samples are available) and `CorruptChunk` only invalidates one chunk.
/// Everything else aborts the run.
///
/// Error code range: 2001-2009
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// Extraction window is not fully covered by the available samples
    IncompleteWindow {
        edge: WindowEdge,
        peak_time: f64,
        available_start: u64,
        available_end: u64,
    },

    /// `project` called before `fit`
    BasisNotFit,

    /// Fit protocol step invoked in the wrong phase
    InvalidPhase {
        operation: &'static str,
        phase: &'static str,
    },

    /// Waveform sample is too small to fit the basis
    InsufficientWaveforms { required: usize, collected: usize },

    /// Jacobi sweeps exhausted
    ConvergenceFailed { sweeps: usize },

    /// Chunk carried NaN or infinite samples
    CorruptChunk { chunk_index: usize, reason: String },

    /// Reading from the raw data source failed
    Source { reason: String },

    /// Writing to the output sink failed
    Sink { reason: String },

    /// Configuration rejected while setting up the run
    Config(ConfigError),
}

impl DetectionError {
    /// Whether the run may continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DetectionError::IncompleteWindow { .. } | DetectionError::CorruptChunk { .. }
        )
    }
}

impl ErrorCode for DetectionError {
    fn code(&self) -> i32 {
        match self {
            DetectionError::IncompleteWindow { .. } => DetectionErrorCodes::INCOMPLETE_WINDOW,
            DetectionError::BasisNotFit => DetectionErrorCodes::BASIS_NOT_FIT,
            DetectionError::InvalidPhase { .. } => DetectionErrorCodes::INVALID_PHASE,
            DetectionError::InsufficientWaveforms { .. } => {
                DetectionErrorCodes::INSUFFICIENT_WAVEFORMS
            }
            DetectionError::ConvergenceFailed { .. } => DetectionErrorCodes::CONVERGENCE_FAILED,
            DetectionError::CorruptChunk { .. } => DetectionErrorCodes::CORRUPT_CHUNK,
            DetectionError::Source { .. } => DetectionErrorCodes::SOURCE,
            DetectionError::Sink { .. } => DetectionErrorCodes::SINK,
            DetectionError::Config(_) => DetectionErrorCodes::CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            DetectionError::IncompleteWindow {
                edge,
                peak_time,
                available_start,
                available_end,
            } => format!(
                "Incomplete waveform window ({:?} edge) around peak {:.2}: samples available in [{}, {})",
                edge, peak_time, available_start, available_end
            ),
            DetectionError::BasisNotFit => {
                "Feature basis not fit. Call fit before project.".to_string()
            }
            DetectionError::InvalidPhase { operation, phase } => {
                format!("Cannot {} while feature basis is {}", operation, phase)
            }
            DetectionError::InsufficientWaveforms {
                required,
                collected,
            } => format!(
                "Insufficient waveforms: need {}, got {}",
                required, collected
            ),
            DetectionError::ConvergenceFailed { sweeps } => {
                format!("Eigen-decomposition did not converge after {} sweeps", sweeps)
            }
            DetectionError::CorruptChunk {
                chunk_index,
                reason,
            } => format!("Chunk {} skipped: {}", chunk_index, reason),
            DetectionError::Source { reason } => format!("Raw data source failed: {}", reason),
            DetectionError::Sink { reason } => format!("Spike sink failed: {}", reason),
            DetectionError::Config(err) => err.message(),
        }
    }
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DetectionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for DetectionError {}

/// Convert from std::io::Error to DetectionError
impl From<std::io::Error> for DetectionError {
    fn from(err: std::io::Error) -> Self {
        DetectionError::Source {
            reason: err.to_string(),
        }
    }
}

impl From<ConfigError> for DetectionError {
    fn from(err: ConfigError) -> Self {
        DetectionError::Config(err)
    }
}
