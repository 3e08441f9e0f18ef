//! Serial port transport backed by the `serialport` crate.

use std::io::Read;
use std::time::Duration;

use log::trace;
use serialport::ClearBuffer;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default link speed for instrument protocols.
pub const DEFAULT_BAUD: u32 = 57_600;

/// A [`Transport`] over a native serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    baud: u32,
}

impl SerialTransport {
    /// Open `name` at the given speed with the 8N1 settings the
    /// instruments expect.
    pub fn open(name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(name, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()?;
        Ok(Self {
            port,
            name: name.to_string(),
            baud,
        })
    }

    /// Open `name` at [`DEFAULT_BAUD`].
    pub fn open_default(name: &str) -> Result<Self> {
        Self::open(name, DEFAULT_BAUD)
    }

    /// Current link speed.
    #[must_use]
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// List the serial ports visible to the OS.
    pub fn available_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        serialport::available_ports().map_err(Error::Serial)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.port.set_timeout(timeout)?;
        let mut buf = vec![0u8; max.min(super::READ_CHUNK).max(1)];
        match self.port.read(&mut buf) {
            Ok(0) => Err(Error::Read("serial port returned no data".into())),
            Ok(n) => {
                buf.truncate(n);
                trace!("read {n} bytes: {buf:02x?}");
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(Error::Timeout(timeout)),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("write {} bytes: {data:02x?}", data.len());
        let written = std::io::Write::write(&mut self.port, data)?;
        if written != data.len() {
            return Err(Error::Write {
                written,
                expected: data.len(),
            });
        }
        std::io::Write::flush(&mut self.port)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_speed(&mut self, baud: u32) -> Result<()> {
        trace!("set speed {baud}");
        self.port.set_baud_rate(baud)?;
        self.baud = baud;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
