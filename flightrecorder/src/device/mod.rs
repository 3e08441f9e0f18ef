//! Device-family glue over the protocol engine.
//!
//! Each supported instrument family speaks one of the framing dialects:
//!
//! - [`fifty20`]: 5020/5030/6020/6030 and the Brauniger Competino/Compeo
//!   line, sentence protocol with XON/XOFF flow control,
//! - [`sixty15`]: 6015 / IQ-Basic, plain `\r\n` line protocol,
//! - [`flymaster`]: Flymaster B1/F1, sentence commands with a binary
//!   packet tracklog download.
//!
//! The modules here only cover identity, track listings and firmware
//! flashing; waypoint file dialects and IGC reconstruction are left to
//! callers.

pub mod fifty20;
pub mod flymaster;
pub mod sixty15;

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::Result;

/// Identity of a connected instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Manufacturer name.
    pub manufacturer: String,
    /// Model name as reported by the instrument.
    pub model: String,
    /// Serial number.
    pub serial_number: u32,
    /// Firmware/software version string.
    pub software_version: String,
    /// Pilot name, where the family exposes one.
    pub pilot_name: Option<String>,
}

/// One entry of an instrument's track memory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrackSummary {
    /// Slot index used to address the track in download commands.
    pub index: u32,
    /// UTC start time.
    pub datetime: NaiveDateTime,
    /// Recorded duration.
    pub duration: Duration,
}

/// Common operations the CLI dispatches on.
pub trait Instrument {
    /// Query the instrument's identity.
    fn device_info(&mut self) -> Result<DeviceInfo>;

    /// List the tracks held in instrument memory.
    fn track_list(&mut self) -> Result<Vec<TrackSummary>>;
}
