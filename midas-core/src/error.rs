//! Error types for the Midas LCD system

use thiserror::Error;

/// Core error type for Midas LCD operations
#[derive(Error, Debug)]
pub enum MidasError {
    /// Device database could not be enumerated
    #[error("Device enumeration error: {0}")]
    Enumeration(String),

    /// No live serial port matches the target device
    #[error("Device not found (VID:{vendor_id} PID:{product_id}). Is it plugged in?")]
    DeviceNotFound {
        vendor_id: String,
        product_id: String,
    },

    /// Opening or writing to the serial endpoint failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Sensor provider failed to open or update
    #[error("Sensor provider error: {0}")]
    Provider(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reconnection failed after max retries
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectionFailed { attempts: u32, reason: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Midas LCD operations
pub type Result<T> = std::result::Result<T, MidasError>;

/// Determine if an error should send the polling loop back to discovery
///
/// Returns `true` for failures of the device, the link or the sensor
/// provider. Configuration and input errors are not retried.
pub fn is_recoverable(err: &MidasError) -> bool {
    matches!(
        err,
        MidasError::Connection(_)
            | MidasError::Provider(_)
            | MidasError::DeviceNotFound { .. }
            | MidasError::Enumeration(_)
    )
}
