//! Error types for dc210.

use std::io;
use thiserror::Error;

/// Result type for dc210 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for dc210 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The camera answered with bytes that do not fit the current step.
    #[error("Unexpected response in {state}: expected {expected}, got {actual}")]
    ProtocolMismatch {
        /// Session step that was waiting for the response.
        state: String,
        /// What the step expected.
        expected: String,
        /// What actually arrived.
        actual: String,
    },

    /// Packet checksum did not net to zero (strict mode only).
    #[error("Bad checksum in {state} packet")]
    ChecksumMismatch {
        /// Session step that received the packet.
        state: String,
    },

    /// The camera sent more bytes than the packet declared.
    #[error("Packet overrun: declared {declared} bytes, received {received}")]
    Overrun {
        /// Declared packet length in bytes.
        declared: usize,
        /// Bytes actually consumed for the packet.
        received: usize,
    },

    /// Picture size outside what the download buffer can handle.
    #[error("Picture size {size} out of range (must be > {min} and <= {max})")]
    SizeConstraint {
        /// Size reported by the camera.
        size: u32,
        /// Exclusive lower bound.
        min: u32,
        /// Inclusive upper bound.
        max: u32,
    },

    /// Requested picture index does not exist on the camera.
    #[error("Cannot access picture {index} (indexed from 0), only {available} pictures in camera")]
    PictureOutOfRange {
        /// Requested index.
        index: u16,
        /// Number of pictures stored on the camera.
        available: u16,
    },

    /// The camera rejected a command or packet.
    #[error("Camera rejected request in {state}")]
    Nak {
        /// Session step that got the rejection.
        state: String,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Interrupted by the embedding application.
    #[error("Interrupted")]
    Interrupted,

    /// Unsupported setting or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid argument or malformed input buffer.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns `true` for errors that leave the camera mid-protocol.
    pub fn is_protocol_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolMismatch { .. }
                | Self::Overrun { .. }
                | Self::Nak { .. }
                | Self::Timeout(_)
                | Self::Interrupted
        )
    }
}
