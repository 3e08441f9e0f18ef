//! # flightrecorder
//!
//! A library for talking to handheld flight recorder instruments over a
//! serial link.
//!
//! The crate is built around a small protocol engine:
//!
//! - Checksummed sentence encode/decode for the text protocols
//! - Length-prefixed binary packet framing with ACK/NAK recovery
//! - Declarative fixed-layout binary record decoding
//! - Request/response sessions with flow-control handling
//! - Firmware image decryption, S-record parsing and page assembly
//! - A flash programming state machine for reflashing instruments
//!
//! Device-family glue for the Flytec/Brauniger 5020 and 6015 lines and
//! for Flymaster instruments sits on top of the engine in [`device`].
//!
//! ## Supported Platforms
//!
//! The engine itself is I/O-agnostic: everything runs against the
//! [`transport::Transport`] trait. The `native` feature (default) adds a
//! serial port implementation via the `serialport` crate.
//!
//! ## Features
//!
//! - `native` (default): native serial port support
//! - `serde`: serialization support for report types
//!
//! ## Example
//!
//! ```rust,no_run
//! use flightrecorder::device::fifty20::Fifty20;
//! use flightrecorder::device::Instrument;
//! use flightrecorder::transport::SerialTransport;
//!
//! fn main() -> flightrecorder::Result<()> {
//!     let mut transport = SerialTransport::open_default("/dev/ttyUSB0")?;
//!     let mut device = Fifty20::new(&mut transport);
//!     let info = device.device_info()?;
//!     println!("{} {} #{}", info.manufacturer, info.model, info.serial_number);
//!     for track in device.track_list()? {
//!         println!("track {:02}: {}", track.index, track.datetime);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod firmware;
pub mod flash;
pub mod framer;
pub mod record;
pub mod sentence;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use {
    device::{DeviceInfo, Instrument, TrackSummary},
    error::{Error, Result},
    firmware::{FirmwareImage, FirmwareModel, Page, SRecordFile, Vigenere},
    flash::{FlashProfile, FlashProgrammer, FlashState},
    framer::{Frame, FramerConfig, Packet, PacketFramer},
    record::{FieldKind, FieldSpec, Record, RecordLayout},
    session::CommandSession,
    transport::{MockTransport, Transport},
};

#[cfg(feature = "native")]
pub use transport::SerialTransport;
