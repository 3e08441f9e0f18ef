//! Transport abstraction for the serial link to an instrument.
//!
//! Every protocol layer in this crate is written against the [`Transport`]
//! trait rather than an OS handle, so the framing, session, and flashing
//! code can run identically over a real serial port or a scripted mock.
//!
//! ```text
//! +---------------------------+
//! |  session / framer / flash |
//! +-------------+-------------+
//!               |
//!               v
//!       +---------------+
//!       |   Transport   |
//!       +-------+-------+
//!               |
//!       +-------+---------+
//!       |                 |
//! +-----+-------+  +------+------+
//! | Serial      |  | Mock        |
//! | (serialport)|  | (scripted)  |
//! +-------------+  +-------------+
//! ```
//!
//! The link is half duplex: exactly one logical actor drives one transport,
//! and the only suspension points are reads, each bounded by an explicit
//! timeout.

pub mod mock;

#[cfg(feature = "native")]
pub mod serial;

use std::time::Duration;

use crate::error::{Error, Result};

/// Default chunk size for unsized reads.
pub const READ_CHUNK: usize = 1024;

/// A byte-stream link to an instrument.
///
/// `read` returns whatever chunk of bytes (at most `max`) is available
/// within `timeout`, erroring with [`Error::Timeout`] if nothing arrives.
/// Whether a timeout is fatal or the normal end of a response burst is the
/// caller's decision.
pub trait Transport {
    /// Read the next available chunk of at most `max` bytes, waiting at
    /// most `timeout` for the first byte.
    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Write all of `data`, erroring on a short write.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Discard any pending bytes in both directions.
    ///
    /// Used for error recovery so a half-consumed response never corrupts
    /// the next exchange.
    fn flush(&mut self) -> Result<()>;

    /// Reconfigure the link speed (both ends must agree out of band).
    fn set_speed(&mut self, baud: u32) -> Result<()>;

    /// Human-readable name of the link (port path or mock label).
    fn name(&self) -> &str;

    /// Read exactly `n` bytes, accumulating chunks until enough arrived.
    ///
    /// The timeout applies per chunk, not to the whole read.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(n);
        while data.len() < n {
            let chunk = self.read(n - data.len(), timeout)?;
            if chunk.is_empty() {
                return Err(Error::Read(format!(
                    "link closed after {} of {n} bytes",
                    data.len()
                )));
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

// Re-export the implementations
pub use mock::MockTransport;

#[cfg(feature = "native")]
pub use serial::SerialTransport;
