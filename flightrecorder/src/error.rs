//! Error types for flightrecorder.

use std::io;
use thiserror::Error;

/// Result type for flightrecorder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for flightrecorder operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No data arrived within the read deadline.
    ///
    /// Depending on the call site this is either a hard failure or the
    /// normal end-of-response signal; see [`crate::session`].
    #[error("Timeout: no data within {0:?}")]
    Timeout(std::time::Duration),

    /// Transport delivered fewer bytes than requested.
    #[error("Read error: {0}")]
    Read(String),

    /// Transport accepted fewer bytes than written.
    #[error("Write error: short write ({written} of {expected} bytes)")]
    Write {
        /// Bytes the transport actually took.
        written: usize,
        /// Bytes that were handed to it.
        expected: usize,
    },

    /// A sentence failed the envelope or checksum rules on decode.
    #[error("Sentence decode error: {0}")]
    Decode(String),

    /// A payload cannot be rendered as a valid sentence.
    #[error("Sentence encode error: {0}")]
    Encode(String),

    /// Unexpected response shape, cardinality violation, or bad acknowledgement.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Buffer too short for a record layout, or a layout misuse.
    #[error("Record format error: {0}")]
    Format(String),

    /// Malformed or length-inconsistent S-record line.
    #[error("S-record error: {0}")]
    SRecord(String),

    /// Character outside the firmware cipher alphabet.
    #[error("Cipher error: byte {0:#04x} outside alphabet")]
    Cipher(u8),

    /// Flash handshake mismatch or status-register error bit.
    #[error("Flash error: {0}")]
    Flash(String),

    /// Operation not supported by this device family.
    #[error("Not available: {0}")]
    NotAvailable(String),
}

impl Error {
    /// Whether this error is a read timeout.
    ///
    /// Call sites that treat the absence of further data as a normal
    /// terminator branch on this instead of matching the variant.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
