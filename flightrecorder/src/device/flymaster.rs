//! Flymaster B1/F1 protocol glue.
//!
//! Commands and list responses are plain sentences without flow control;
//! a track download switches the link to the binary packet protocol and
//! streams fixed-layout records until the terminator id. The record
//! layouts are little-endian throughout.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

use crate::device::{DeviceInfo, Instrument, TrackSummary};
use crate::error::{Error, Result};
use crate::framer::{Frame, PacketFramer};
use crate::record::{FieldKind, FieldSpec, RecordLayout};
use crate::sentence;
use crate::session::CommandSession;
use crate::transport::Transport;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(1);

/// Packet id of the flight information record.
pub const PACKET_FLIGHT_INFO: u16 = 0xa0a0;
/// Packet id of a key track position record.
pub const PACKET_KEY_POSITION: u16 = 0xa1a1;
/// Packet id of a burst of position delta records.
pub const PACKET_POSITION_DELTAS: u16 = 0xa2a2;

/// Tracklog timestamps count from this epoch.
fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

static FLIGHT_INFO_LAYOUT: RecordLayout = RecordLayout::new(&[
    FieldSpec::le(FieldKind::U8, Some("firmware_major")),
    FieldSpec::le(FieldKind::U8, Some("firmware_minor")),
    FieldSpec::le(FieldKind::U8, Some("hardware_major")),
    FieldSpec::le(FieldKind::U8, Some("hardware_minor")),
    FieldSpec::le(FieldKind::U32, Some("serial_number")),
    FieldSpec::le(FieldKind::Bytes(8), Some("competition_number")),
    FieldSpec::le(FieldKind::Bytes(15), Some("pilot_name")),
    FieldSpec::le(FieldKind::Bytes(15), Some("glider_brand")),
    FieldSpec::le(FieldKind::Bytes(15), Some("glider_model")),
]);

static KEY_POSITION_LAYOUT: RecordLayout = RecordLayout::new(&[
    FieldSpec::le(FieldKind::U8, Some("fix_flag")),
    FieldSpec::le(FieldKind::I32, Some("latitude")),
    FieldSpec::le(FieldKind::I32, Some("longitude")),
    FieldSpec::le(FieldKind::I16, Some("altitude")),
    FieldSpec::le(FieldKind::I16, Some("pressure")),
    FieldSpec::le(FieldKind::U32, Some("seconds")),
]);

static POSITION_DELTA_LAYOUT: RecordLayout = RecordLayout::new(&[
    FieldSpec::le(FieldKind::U8, Some("fix_flag")),
    FieldSpec::le(FieldKind::I8, Some("latitude")),
    FieldSpec::le(FieldKind::I8, Some("longitude")),
    FieldSpec::le(FieldKind::I8, Some("altitude")),
    FieldSpec::le(FieldKind::I8, Some("pressure")),
    FieldSpec::le(FieldKind::I8, Some("seconds")),
]);

fn trimmed_string(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Identity block of a `PFMSNP,` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snp {
    /// Instrument name (e.g. `B1NAV`).
    pub instrument: String,
    /// Serial number.
    pub serial_number: u32,
    /// Firmware version string.
    pub firmware_version: String,
}

/// Parse the payload of a `PFMSNP,` sentence.
#[must_use]
pub fn parse_snp(payload: &str) -> Option<Snp> {
    let rest = payload.strip_prefix("PFMSNP,")?;
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 6 {
        return None;
    }
    Some(Snp {
        instrument: fields[0].to_string(),
        serial_number: fields[2].parse().ok()?,
        firmware_version: fields[3].to_string(),
    })
}

/// Parse one `PFMLST,` entry into `(total, summary)`.
#[must_use]
pub fn parse_tracklog_entry(payload: &str) -> Option<(u32, TrackSummary)> {
    let rest = payload.strip_prefix("PFMLST,")?;
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 5 {
        return None;
    }
    let count: u32 = fields[0].parse().ok()?;
    let index: u32 = fields[1].parse().ok()?;
    let date: Vec<u32> = fields[2]
        .split('.')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let time: Vec<u32> = fields[3]
        .split(':')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let duration: Vec<u64> = fields[4]
        .split(':')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let (&[day, month, year], &[hour, minute, second], &[hours, minutes, seconds]) =
        (&date[..], &time[..], &duration[..])
    else {
        return None;
    };
    let datetime = NaiveDate::from_ymd_opt(2000 + year as i32, month, day)?
        .and_hms_opt(hour, minute, second)?;
    Some((
        count,
        TrackSummary {
            index,
            datetime,
            duration: Duration::from_secs(3600 * hours + 60 * minutes + seconds),
        },
    ))
}

/// The flight information record opening a track download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightInfo {
    /// Firmware version as `major.minor`.
    pub firmware_version: String,
    /// Hardware version as `major.minor`.
    pub hardware_version: String,
    /// Serial number.
    pub serial_number: u32,
    /// Competition number, NUL padding removed.
    pub competition_number: String,
    /// Pilot name, NUL padding removed.
    pub pilot_name: String,
    /// Glider brand, NUL padding removed.
    pub glider_brand: String,
    /// Glider model, NUL padding removed.
    pub glider_model: String,
}

impl FlightInfo {
    /// Decode from a `0xa0a0` packet payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let r = FLIGHT_INFO_LAYOUT.decode(data)?;
        Ok(Self {
            firmware_version: format!(
                "{}.{:02}",
                r.unsigned("firmware_major")?,
                r.unsigned("firmware_minor")?
            ),
            hardware_version: format!(
                "{}.{:02}",
                r.unsigned("hardware_major")?,
                r.unsigned("hardware_minor")?
            ),
            serial_number: r.unsigned("serial_number")?,
            competition_number: trimmed_string(r.bytes("competition_number")?),
            pilot_name: trimmed_string(r.bytes("pilot_name")?),
            glider_brand: trimmed_string(r.bytes("glider_brand")?),
            glider_model: trimmed_string(r.bytes("glider_model")?),
        })
    }
}

/// An absolute track position fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPosition {
    /// GPS fix flags.
    pub fix_flag: u8,
    /// Latitude in the instrument's fixed-point unit.
    pub latitude: i32,
    /// Longitude in the instrument's fixed-point unit.
    pub longitude: i32,
    /// Altitude in meters.
    pub altitude: i32,
    /// Barometric pressure reading.
    pub pressure: i32,
    /// UTC fix time.
    pub datetime: NaiveDateTime,
}

impl KeyPosition {
    /// Decode from a `0xa1a1` packet payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let r = KEY_POSITION_LAYOUT.decode(data)?;
        let seconds = r.unsigned("seconds")?;
        Ok(Self {
            fix_flag: r.unsigned("fix_flag")? as u8,
            latitude: r.signed("latitude")?,
            longitude: r.signed("longitude")?,
            altitude: r.signed("altitude")?,
            pressure: r.signed("pressure")?,
            datetime: epoch() + chrono::Duration::seconds(i64::from(seconds)),
        })
    }
}

/// A position fix relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionDelta {
    /// GPS fix flags.
    pub fix_flag: u8,
    /// Latitude offset.
    pub latitude: i8,
    /// Longitude offset.
    pub longitude: i8,
    /// Altitude offset in meters.
    pub altitude: i8,
    /// Pressure offset.
    pub pressure: i8,
    /// Time offset in seconds.
    pub seconds: i8,
}

impl PositionDelta {
    /// Decode a whole `0xa2a2` payload, six bytes per delta.
    pub fn decode_many(data: &[u8]) -> Result<Vec<Self>> {
        if data.len() % POSITION_DELTA_LAYOUT.size() != 0 {
            return Err(Error::Format(format!(
                "delta payload length {} is not a multiple of {}",
                data.len(),
                POSITION_DELTA_LAYOUT.size()
            )));
        }
        data.chunks(POSITION_DELTA_LAYOUT.size())
            .map(|chunk| {
                let r = POSITION_DELTA_LAYOUT.decode(chunk)?;
                Ok(Self {
                    fix_flag: r.unsigned("fix_flag")? as u8,
                    latitude: r.signed("latitude")? as i8,
                    longitude: r.signed("longitude")? as i8,
                    altitude: r.signed("altitude")? as i8,
                    pressure: r.signed("pressure")? as i8,
                    seconds: r.signed("seconds")? as i8,
                })
            })
            .collect()
    }
}

/// One record of a track download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackRecord {
    /// Flight information header.
    FlightInfo(FlightInfo),
    /// Absolute position fix.
    Key(KeyPosition),
    /// Burst of delta fixes.
    Deltas(Vec<PositionDelta>),
}

/// Protocol driver for Flymaster instruments.
pub struct Flymaster<'a, T: Transport> {
    transport: &'a mut T,
}

impl<'a, T: Transport> Flymaster<'a, T> {
    /// Wrap a transport connected to a Flymaster instrument.
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Query the identity block.
    pub fn snp(&mut self) -> Result<Snp> {
        let mut session = CommandSession::new(&mut *self.transport);
        session.one("PFMSNP,", parse_snp, EXCHANGE_TIMEOUT)
    }

    /// List the tracks in instrument memory.
    ///
    /// The listing announces its own length; iteration stops at the entry
    /// whose index closes the count.
    pub fn tracks(&mut self) -> Result<Vec<TrackSummary>> {
        let mut session = CommandSession::new(&mut *self.transport);
        let mut responses = session.each("PFMDNL,LST,", parse_tracklog_entry, EXCHANGE_TIMEOUT)?;
        let mut tracks = Vec::new();
        for item in &mut responses {
            let (count, summary) = item?;
            let done = summary.index + 1 >= count;
            tracks.push(summary);
            if done {
                break;
            }
        }
        Ok(tracks)
    }

    /// Download a track as typed records.
    ///
    /// The instrument answers the download command with binary packets;
    /// every packet is checksum-verified and acknowledged by the framer
    /// before it is decoded here.
    pub fn track_packets(
        &mut self,
        track: &TrackSummary,
        timeout: Duration,
    ) -> Result<Vec<TrackRecord>> {
        let command = format!("PFMDNL,{},", track.datetime.format("%y%m%d%H%M%S"));
        self.transport.write(&sentence::encode(&command)?)?;
        let mut framer = PacketFramer::new(&mut *self.transport);
        let mut records = Vec::new();
        loop {
            match framer.read_frame(timeout)? {
                Frame::End => break,
                Frame::Data(packet) => match packet.id {
                    PACKET_FLIGHT_INFO => {
                        records.push(TrackRecord::FlightInfo(FlightInfo::decode(&packet.payload)?));
                    }
                    PACKET_KEY_POSITION => {
                        records.push(TrackRecord::Key(KeyPosition::decode(&packet.payload)?));
                    }
                    PACKET_POSITION_DELTAS => {
                        records.push(TrackRecord::Deltas(PositionDelta::decode_many(
                            &packet.payload,
                        )?));
                    }
                    id => debug!("ignoring unknown packet type {id:#06x}"),
                },
            }
        }
        Ok(records)
    }
}

impl<T: Transport> Instrument for Flymaster<'_, T> {
    fn device_info(&mut self) -> Result<DeviceInfo> {
        let snp = self.snp()?;
        Ok(DeviceInfo {
            manufacturer: "Flymaster".to_string(),
            model: snp.instrument,
            serial_number: snp.serial_number,
            software_version: snp.firmware_version,
            pilot_name: None,
        })
    }

    fn track_list(&mut self) -> Result<Vec<TrackSummary>> {
        self.tracks()
    }
}
