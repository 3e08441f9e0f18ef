//! 5020/5030/6020/6030 and Brauniger Competino/Compeo protocol glue.
//!
//! This family speaks the flow-controlled sentence dialect: every command
//! is answered by an XOFF-bracketed burst of `PBR*` sentences. Settings
//! live in a small memory map accessed through `PBRMEMR`/`PBRMEMW` and
//! only take effect after a `PBRCONF,` commit, which is modeled here as an
//! explicit [`ConfigTransaction`].

use std::time::Duration;

use chrono::NaiveDate;
use log::debug;

use crate::device::{DeviceInfo, Instrument, TrackSummary};
use crate::error::{Error, Result};
use crate::session::CommandSession;
use crate::transport::Transport;

const SNP_TIMEOUT: Duration = Duration::from_millis(200);
const LIST_TIMEOUT: Duration = Duration::from_millis(500);
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity block of a `PBRSNP,` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snp {
    /// Model name (e.g. `6020`, `COMPEO+`).
    pub model: String,
    /// Pilot name, whitespace-trimmed.
    pub pilot_name: String,
    /// Serial number.
    pub serial_number: u32,
    /// Software version string.
    pub software_version: String,
}

fn manufacturer(model: &str) -> &'static str {
    match model {
        "5020" | "5030" | "6020" | "6030" => "Flytec",
        _ => "Brauniger",
    }
}

/// Parse the payload of a `PBRSNP,` sentence.
#[must_use]
pub fn parse_snp(payload: &str) -> Option<Snp> {
    let rest = payload.strip_prefix("PBRSNP,")?;
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 4 {
        return None;
    }
    Some(Snp {
        model: fields[0].to_string(),
        pilot_name: fields[1].trim().to_string(),
        serial_number: fields[2].parse().ok()?,
        software_version: fields[3].to_string(),
    })
}

/// Parse the payload of a `PBRTL,` track list sentence:
/// `PBRTL,<total>,<index>,<dd>.<mm>.<yy>,<HH>:<MM>:<SS>,<h>:<m>:<s>`.
#[must_use]
pub fn parse_track(payload: &str) -> Option<TrackSummary> {
    let rest = payload.strip_prefix("PBRTL,")?;
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 5 {
        return None;
    }
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
    Some(TrackSummary {
        index,
        datetime,
        duration: Duration::from_secs(3600 * hours + 60 * minutes + seconds),
    })
}

/// Parse the payload of a `PBRMEMR,` response into `(address, bytes)`.
#[must_use]
pub fn parse_memory(payload: &str) -> Option<(u16, Vec<u8>)> {
    let rest = payload.strip_prefix("PBRMEMR,")?;
    let mut fields = rest.split(',');
    let address = u16::from_str_radix(fields.next()?, 16).ok()?;
    let bytes: Vec<u8> = fields
        .map(|f| u8::from_str_radix(f, 16))
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some((address, bytes))
}

/// A writable entry of the instrument's settings memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Pilot name, 16 characters.
    PilotName,
    /// Glider type, 16 characters.
    GliderType,
    /// Glider id, 16 characters.
    GliderId,
    /// Track recording interval in seconds, one byte.
    RecordingInterval,
}

impl Setting {
    fn address(self) -> u16 {
        match self {
            Self::PilotName => 0,
            Self::RecordingInterval => 97,
            Self::GliderType => 192,
            Self::GliderId => 224,
        }
    }

    fn width(self) -> usize {
        match self {
            Self::RecordingInterval => 1,
            _ => 16,
        }
    }
}

/// Protocol driver for the 5020/6020 family.
pub struct Fifty20<'a, T: Transport> {
    session: CommandSession<'a, T>,
}

impl<'a, T: Transport> Fifty20<'a, T> {
    /// Wrap a transport connected to a 5020-family instrument.
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            session: CommandSession::with_flow_control(transport),
        }
    }

    /// Query the identity block.
    pub fn snp(&mut self) -> Result<Snp> {
        self.session.one("PBRSNP,", parse_snp, SNP_TIMEOUT)
    }

    /// List the tracks in instrument memory.
    pub fn tracks(&mut self) -> Result<Vec<TrackSummary>> {
        self.session
            .each("PBRTL,", parse_track, LIST_TIMEOUT)?
            .collect()
    }

    /// Stream the raw track log lines for the given track slot.
    ///
    /// Lines are passed through untouched; assembling them into an IGC
    /// file is the caller's concern.
    pub fn track_log(
        &mut self,
        index: u32,
        timeout: Duration,
    ) -> Result<impl Iterator<Item = Result<String>> + '_> {
        self.session.raw_each(&format!("PBRTR,{index:02}"), timeout)
    }

    /// Read `length` bytes of settings memory starting at `address`.
    pub fn memory_read(&mut self, address: u16, length: usize) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(length);
        let mut first = address;
        while result.len() < length {
            let (echoed, bytes) = self.session.one(
                &format!("PBRMEMR,{first:04X}"),
                parse_memory,
                EXCHANGE_TIMEOUT,
            )?;
            if echoed != first {
                return Err(Error::Protocol(format!(
                    "memory read address mismatch: asked {first:04X}, got {echoed:04X}"
                )));
            }
            first = first.wrapping_add(bytes.len() as u16);
            result.extend(bytes);
        }
        result.truncate(length);
        Ok(result)
    }

    /// Write `value` to settings memory at `address`, verifying the
    /// instrument's readback chunk by chunk.
    pub fn memory_write(&mut self, address: u16, value: &[u8]) -> Result<()> {
        let mut address = address;
        for chunk in value.chunks(8) {
            let mut command = format!("PBRMEMW,{address:04X},{}", chunk.len());
            for byte in chunk {
                command.push_str(&format!(",{byte:02X}"));
            }
            command.push_str(&",".repeat(8 - chunk.len()));
            let (echoed, bytes) = self.session.one(&command, parse_memory, EXCHANGE_TIMEOUT)?;
            if echoed != address {
                return Err(Error::Protocol(format!(
                    "memory write address mismatch: asked {address:04X}, got {echoed:04X}"
                )));
            }
            if bytes.len() < chunk.len() || &bytes[..chunk.len()] != chunk {
                return Err(Error::Protocol(format!(
                    "memory write readback mismatch at {address:04X}"
                )));
            }
            address = address.wrapping_add(chunk.len() as u16);
        }
        Ok(())
    }

    /// Read one setting from the memory map.
    pub fn setting(&mut self, setting: Setting) -> Result<Vec<u8>> {
        self.memory_read(setting.address(), setting.width())
    }

    /// Start a settings transaction.
    ///
    /// Writes through the transaction are staged in instrument memory and
    /// only take effect on [`ConfigTransaction::commit`], which issues the
    /// `PBRCONF,` reconfiguration exactly once.
    pub fn begin_config(&mut self) -> ConfigTransaction<'_, 'a, T> {
        ConfigTransaction {
            device: self,
            dirty: false,
        }
    }
}

impl<T: Transport> Instrument for Fifty20<'_, T> {
    fn device_info(&mut self) -> Result<DeviceInfo> {
        let snp = self.snp()?;
        Ok(DeviceInfo {
            manufacturer: manufacturer(&snp.model).to_string(),
            model: snp.model,
            serial_number: snp.serial_number,
            software_version: snp.software_version,
            pilot_name: Some(snp.pilot_name),
        })
    }

    fn track_list(&mut self) -> Result<Vec<TrackSummary>> {
        self.tracks()
    }
}

/// A settings write bracket; see [`Fifty20::begin_config`].
pub struct ConfigTransaction<'s, 'a, T: Transport> {
    device: &'s mut Fifty20<'a, T>,
    dirty: bool,
}

impl<T: Transport> ConfigTransaction<'_, '_, T> {
    /// Stage a text setting, truncated and space-padded to its width.
    pub fn set_text(&mut self, setting: Setting, value: &str) -> Result<()> {
        let width = setting.width();
        if width == 1 {
            return Err(Error::NotAvailable(format!("{setting:?} is not a text setting")));
        }
        let mut bytes = value.as_bytes().to_vec();
        bytes.truncate(width);
        bytes.resize(width, b' ');
        self.device.memory_write(setting.address(), &bytes)?;
        self.dirty = true;
        Ok(())
    }

    /// Stage a one-byte setting.
    pub fn set_byte(&mut self, setting: Setting, value: u8) -> Result<()> {
        if setting.width() != 1 {
            return Err(Error::NotAvailable(format!("{setting:?} is not a byte setting")));
        }
        self.device.memory_write(setting.address(), &[value])?;
        self.dirty = true;
        Ok(())
    }

    /// Apply the staged settings with a single `PBRCONF,`.
    pub fn commit(self) -> Result<()> {
        if !self.dirty {
            debug!("empty config transaction, skipping PBRCONF");
            return Ok(());
        }
        self.device.session.none("PBRCONF,", EXCHANGE_TIMEOUT)
    }
}
