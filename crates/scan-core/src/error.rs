//! Error types shared by every scan crate.
//!
//! `ScanError` is the single error type surfaced by the orchestration engine
//! and by the capability traits in [`crate::capabilities`]. Driver crates
//! report hardware problems as [`DriverError`] (wrapped in
//! [`ScanError::Driver`]) or, for opaque vendor failures, as an
//! `anyhow::Error` in [`ScanError::Device`].
//!
//! ## Error Categories
//!
//! 1. **Usage errors** - `InvalidState`, `Configuration`, `Unit`, `Shape`
//!    - Raised before any motion whenever possible
//!    - Permanent: fix the call site or the configuration
//!
//! 2. **Hardware errors** - `Driver`, `Device`, `Io`, `Timeout`
//!    - Surfaced after the scan's cleanup has run
//!
//! 3. **Cancellation** - `Cancelled`
//!    - Distinct outcome of [`stop`](crate::capabilities::DataSource::stop)
//!      during an active scan; never a failure of the hardware

use crate::units::UnitError;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Broad classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device could not be brought up
    Initialization,
    /// Device rejected its configuration
    Configuration,
    /// Link to the device failed
    Communication,
    /// Device is shutting down
    Shutdown,
    /// Device reported a fault
    Hardware,
    /// Device did not answer in time
    Timeout,
    /// A command argument is out of range
    InvalidParameter,
    /// A pending operation was superseded by a newer command or by `stop()`
    Interrupted,
    /// Unclassified failure
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Interrupted => "interrupted",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error reported by a manipulator or acquisition driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error, e.g. `"mock_manipulator"`
    pub driver_type: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Driver-specific detail
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Scan Errors
// =============================================================================

/// Convenience alias for results using [`ScanError`].
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Primary error type of the scan engine and the capability traits.
#[derive(Error, Debug)]
pub enum ScanError {
    /// An operation was requested in a state that does not allow it.
    ///
    /// Raised by a second `read_data_set` while the first is still in flight.
    /// Nothing is mutated.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Scan parameters or a table resource are invalid.
    ///
    /// Raised before any motion or acquisition starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Waiting for a manipulator to settle exceeded the caller's timeout.
    #[error("Timed out after {timeout_ms} ms waiting for {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// The scan was stopped while active.
    #[error("Scan cancelled")]
    Cancelled,

    /// Unit conversion or checked arithmetic failed.
    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    /// Dataset data and axes disagree, or samples could not be stacked.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A driver reported a failure.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// File or OS level I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opaque device failure from a third-party driver.
    #[error("Device error: {0}")]
    Device(#[from] anyhow::Error),
}

impl ScanError {
    /// Shorthand for [`ScanError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        ScanError::Configuration(message.into())
    }

    /// Whether this error is the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}

impl From<ndarray::ShapeError> for ScanError {
    fn from(err: ndarray::ShapeError) -> Self {
        ScanError::Shape(err.to_string())
    }
}
