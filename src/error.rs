//! # Error Types
//!
//! Custom error types for Modem Telemetry using `thiserror`.
//!
//! Only set-up work (configuration, opening the serial port, encoding the
//! telemetry envelope) is fallible in the `Result` sense. Protocol failures
//! seen while ticking the state machines are routed as state transitions.

use thiserror::Error;

/// Main error type for Modem Telemetry
#[derive(Debug, Error)]
pub enum ModemError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No modem serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Telemetry envelope could not be encoded
    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Result type alias for Modem Telemetry
pub type Result<T> = std::result::Result<T, ModemError>;
