//! 6015 / IQ-Basic protocol glue.
//!
//! This family speaks a plain `\r\n` line protocol without checksummed
//! envelopes: `ACT_xx_yy` action commands, `RPA_xx`/`RFA_xx` hex-encoded
//! parameter reads, and a token-based firmware flashing exchange.

use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, info};

use crate::device::{DeviceInfo, Instrument, TrackSummary};
use crate::error::{Error, Result};
use crate::firmware::SRecordFile;
use crate::record::{FieldKind, FieldSpec, RecordLayout};
use crate::transport::{READ_CHUNK, Transport};

const LINE_TIMEOUT: Duration = Duration::from_secs(1);
const PARAMETER_TIMEOUT: Duration = Duration::from_millis(200);
const LIST_TIMEOUT: Duration = Duration::from_millis(500);

// Flashing exchange tokens.
const FLASH_ENTER: &str = "S007FlyProg_6015AA";
const FLASH_READY: &str = "S007Flash6015_V1F8";
const FLASH_WAIT: &str = "S0056015Wait39";
const FLASH_ERASE: &str = "S004Erase_4C";
const FLASH_DONE: &str = "S003Done16";
const FLASH_ERROR: &str = "S004Error_32";
const FLASH_NOT_READY: &str = "S005NotReady74";

const FLASH_RESPONSES: &[&str] = &[
    FLASH_READY,
    FLASH_WAIT,
    FLASH_ERASE,
    FLASH_DONE,
    FLASH_ERROR,
    FLASH_NOT_READY,
];

static DEVICE_NUMBER_LAYOUT: RecordLayout =
    RecordLayout::new(&[FieldSpec::le(FieldKind::U32, Some("device_number"))]);

static SOFTWARE_VERSION_LAYOUT: RecordLayout =
    RecordLayout::new(&[FieldSpec::le(FieldKind::U16, Some("software_version"))]);

static OWNER_LAYOUT: RecordLayout =
    RecordLayout::new(&[FieldSpec::le(FieldKind::Bytes(16), Some("owner"))]);

fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Parse one track line of an `ACT_20_00` listing.
///
/// Fields are semicolon-separated; the date is `yy.mm.dd`, unlike the
/// 5020 family.
#[must_use]
pub fn parse_track_line(line: &str) -> Option<TrackSummary> {
    let fields: Vec<&str> = line.trim_end().split(';').map(str::trim).collect();
    if fields.len() < 5 {
        return None;
    }
    let index: u32 = fields[0].parse().ok()?;
    let date: Vec<u32> = fields[1]
        .split('.')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let time: Vec<u32> = fields[2]
        .split(':')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let duration: Vec<u64> = fields[4]
        .split(':')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let (&[year, month, day], &[hour, minute, second], &[hours, minutes, seconds]) =
        (&date[..], &time[..], &duration[..])
    else {
        return None;
    };
    let datetime = NaiveDate::from_ymd_opt(2000 + year as i32, month, day)?
        .and_hms_opt(hour, minute, second)?;
    Some(TrackSummary {
        index,
        datetime,
        duration: Duration::from_secs(3600 * hours + 60 * minutes + seconds),
    })
}

/// Protocol driver for the 6015 family.
pub struct Sixty15<'a, T: Transport> {
    transport: &'a mut T,
    buffer: Vec<u8>,
    flash_wait_delay: Duration,
}

impl<'a, T: Transport> Sixty15<'a, T> {
    /// Wrap a transport connected to a 6015-family instrument.
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
            flash_wait_delay: Duration::from_secs(1),
        }
    }

    /// Override the pause taken when the boot agent asks to wait.
    #[must_use]
    pub fn with_flash_wait_delay(mut self, delay: Duration) -> Self {
        self.flash_wait_delay = delay;
        self
    }

    fn fill(&mut self, timeout: Duration) -> Result<()> {
        let chunk = self.transport.read(READ_CHUNK, timeout)?;
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String> {
        loop {
            if let Some(index) = self
                .buffer
                .windows(2)
                .position(|pair| pair == b"\r\n")
            {
                let raw: Vec<u8> = self.buffer.drain(..index + 2).collect();
                let line = String::from_utf8_lossy(&raw).into_owned();
                debug!("read line {line:?}");
                return Ok(line);
            }
            self.fill(timeout)?;
        }
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        debug!("write {:?}", String::from_utf8_lossy(data));
        self.transport.write(data)
    }

    /// Read a hex-encoded `RPA_xx` / `RFA_xx` parameter.
    ///
    /// Returns `None` when the instrument answers `No Par`.
    pub fn read_parameter(&mut self, kind: char, parameter: u8) -> Result<Option<Vec<u8>>> {
        self.write_raw(format!("R{kind}A_{parameter:02X}\r\n").as_bytes())?;
        let line = self.read_line(PARAMETER_TIMEOUT)?;
        if line.trim_end() == "No Par" {
            return Ok(None);
        }
        let prefix = format!("R{kind}A_{parameter:02X}_");
        line.strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix("\r\n"))
            .and_then(hex_to_bytes)
            .map(Some)
            .ok_or_else(|| Error::Protocol(format!("unexpected response {line:?}")))
    }

    /// Identity string reported by `ACT_BD_00`.
    pub fn identity(&mut self) -> Result<String> {
        self.write_raw(b"ACT_BD_00\r\n")?;
        Ok(self.read_line(LINE_TIMEOUT)?.trim().to_string())
    }

    /// Serial number from the device parameter area.
    pub fn serial_number(&mut self) -> Result<u32> {
        let bytes = self
            .read_parameter('P', 0x00)?
            .ok_or_else(|| Error::Protocol("no device number parameter".into()))?;
        DEVICE_NUMBER_LAYOUT.decode(&bytes)?.unsigned("device_number")
    }

    /// Software version from the device parameter area, as `x.y.zz`.
    pub fn software_version(&mut self) -> Result<String> {
        let bytes = self
            .read_parameter('P', 0x02)?
            .ok_or_else(|| Error::Protocol("no software version parameter".into()))?;
        let value = SOFTWARE_VERSION_LAYOUT
            .decode(&bytes)?
            .unsigned("software_version")?;
        Ok(format!(
            "{}.{}.{:02}",
            value / 1000,
            (value / 100) % 10,
            value % 100
        ))
    }

    /// Pilot name from the flight parameter area.
    pub fn pilot_name(&mut self) -> Result<Option<String>> {
        let Some(bytes) = self.read_parameter('F', 0x00)? else {
            return Ok(None);
        };
        let owner = OWNER_LAYOUT.decode(&bytes)?;
        Ok(Some(
            String::from_utf8_lossy(owner.bytes("owner")?).trim().to_string(),
        ))
    }

    /// List the tracks in instrument memory.
    pub fn tracks(&mut self) -> Result<Vec<TrackSummary>> {
        self.write_raw(b"ACT_20_00\r\n")?;
        let mut line = self.read_line(LIST_TIMEOUT)?;
        if line.trim() == "No Data" {
            return Ok(Vec::new());
        }
        let mut tracks = Vec::new();
        while line != " Done\r\n" {
            let summary = parse_track_line(&line)
                .ok_or_else(|| Error::Protocol(format!("unexpected response {line:?}")))?;
            tracks.push(summary);
            line = self.read_line(LIST_TIMEOUT)?;
        }
        Ok(tracks)
    }

    /// Read the next flashing token, optionally requiring a specific one.
    ///
    /// Tokens arrive back to back without line endings, so they are
    /// matched at the head of the receive buffer.
    fn read_flash_response(&mut self, expected: Option<&str>) -> Result<&'static str> {
        loop {
            if let Some(token) = FLASH_RESPONSES
                .iter()
                .copied()
                .find(|token| self.buffer.starts_with(token.as_bytes()))
            {
                self.buffer.drain(..token.len());
                debug!("flash response {token}");
                if let Some(expected) = expected {
                    if token != expected {
                        return Err(Error::Flash(format!(
                            "expected {expected:?}, got {token:?}"
                        )));
                    }
                }
                return Ok(token);
            }
            self.fill(LINE_TIMEOUT)?;
        }
    }

    /// Reflash the instrument from a parsed S-record image.
    ///
    /// The records are sent as text, one acknowledgement token per record;
    /// `progress` is called with `(records_sent, records_total)`.
    pub fn flash_firmware<F>(&mut self, image: &SRecordFile, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        loop {
            self.write_raw(FLASH_ENTER.as_bytes())?;
            match self.read_flash_response(None)? {
                FLASH_READY => break,
                FLASH_WAIT => thread::sleep(self.flash_wait_delay),
                token => {
                    return Err(Error::Flash(format!(
                        "unexpected response {token:?} to flash entry"
                    )));
                }
            }
        }
        info!("boot agent ready, erasing");
        self.write_raw(FLASH_ERASE.as_bytes())?;
        self.read_flash_response(Some(FLASH_ERASE))?;
        self.read_flash_response(Some(FLASH_DONE))?;

        let total = image.records().len();
        info!("writing {total} records");
        for (sent, record) in image.records().iter().enumerate() {
            self.write_raw(record.as_bytes())?;
            self.read_flash_response(Some(FLASH_DONE))?;
            progress(sent + 1, total);
        }
        Ok(())
    }
}

impl<T: Transport> Instrument for Sixty15<'_, T> {
    fn device_info(&mut self) -> Result<DeviceInfo> {
        let identity = self.identity()?;
        let (manufacturer, model) = match identity.as_str() {
            "Flytec 6015" => ("Flytec", "6015"),
            "IQ-Basic GPS" => ("Brauniger", "IQ-Basic"),
            other => {
                return Err(Error::Protocol(format!("unknown instrument {other:?}")));
            }
        };
        Ok(DeviceInfo {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            serial_number: self.serial_number()?,
            software_version: self.software_version()?,
            pilot_name: self.pilot_name()?,
        })
    }

    fn track_list(&mut self) -> Result<Vec<TrackSummary>> {
        self.tracks()
    }
}
