//! Bootloader driver that reprograms instrument flash memory.
//!
//! The 5020/6020 instruments expose an M32C/87-style boot agent on the
//! serial link. Programming is a strict state walk:
//!
//! ```text
//! Uninitialized -> Initialized -> SpeedSet -> Unlocked -> Erased
//!                                                           |
//!                                      Locked <- Writing <--+
//! ```
//!
//! Every erase and page write is followed by polling the status register
//! until the ready bit is set, then checking the matching error bit. Any
//! error bit is fatal and aborts the whole session: flashing is
//! all-or-nothing, a partially written image must never look like success.

use std::thread;
use std::time::Duration;

use log::{debug, info, trace};

use crate::error::{Error, Result};
use crate::firmware::SRecordFile;
use crate::transport::Transport;

/// Device-specific constants for one boot agent.
///
/// These are configuration, not engine logic: other instruments with the
/// same command set differ only in this table.
#[derive(Debug, Clone)]
pub struct FlashProfile {
    /// Zero bytes sent to synchronize the boot agent.
    pub sync_zeros: usize,
    /// Pause between sync bytes.
    pub sync_spacing: Duration,
    /// Byte the agent answers the sync pattern with.
    pub sync_ack: u8,
    /// `(baud, code)` pairs the agent accepts for speed negotiation.
    pub speed_codes: &'static [(u32, u8)],
    /// Speed to negotiate before programming.
    pub programming_baud: u32,
    /// Status register ready bit.
    pub ready: u8,
    /// Status register erase error bit.
    pub erase_error: u8,
    /// Status register program error bit.
    pub program_error: u8,
    /// Status register block error bit.
    pub block_error: u8,
    /// Pause between status polls and after speed/page commands.
    pub poll_interval: Duration,
    /// Flash page size in bytes.
    pub page_size: usize,
    /// Per-read deadline for agent responses.
    pub ack_timeout: Duration,
}

impl FlashProfile {
    /// Profile for the M32C/87 boot agent, programming at `baud`.
    ///
    /// The 5020 family programs at 19200 baud, the 6020 family at 57600.
    #[must_use]
    pub fn m32c87(baud: u32) -> Self {
        Self {
            sync_zeros: 16,
            sync_spacing: Duration::from_millis(20),
            sync_ack: 0xb0,
            speed_codes: &[
                (9_600, 0xb0),
                (19_200, 0xb1),
                (38_400, 0xb2),
                (57_600, 0xb3),
                (115_200, 0xb4),
            ],
            programming_baud: baud,
            ready: 0x80,
            erase_error: 0x20,
            program_error: 0x10,
            block_error: 0x08,
            poll_interval: Duration::from_millis(50),
            page_size: 256,
            ack_timeout: Duration::from_secs(1),
        }
    }
}

// Boot agent command bytes.
const CMD_STATUS_READ: u8 = 0x70;
const CMD_STATUS_CLEAR: u8 = 0x50;
const CMD_UNLOCK: u8 = 0x7a;
const CMD_LOCK: u8 = 0x75;
const CMD_ERASE: u8 = 0xa7;
const CMD_ERASE_CONFIRM: u8 = 0xd0;
const CMD_PAGE_WRITE: u8 = 0x41;

/// Lifecycle of one programming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// No contact with the boot agent yet.
    Uninitialized,
    /// Sync pattern acknowledged.
    Initialized,
    /// Transfer speed negotiated on both ends.
    SpeedSet,
    /// Flash writes unlocked.
    Unlocked,
    /// Flash erased, ready for data.
    Erased,
    /// Pages are being written.
    Writing,
    /// Flash locked again; terminal.
    Locked,
}

/// Drives one flash programming session over a [`Transport`].
///
/// The session is created per firmware update and discarded afterwards;
/// a failed session leaves the programmer unusable by design.
pub struct FlashProgrammer<'a, T: Transport> {
    transport: &'a mut T,
    profile: FlashProfile,
    state: FlashState,
}

impl<'a, T: Transport> FlashProgrammer<'a, T> {
    /// Create a session in the `Uninitialized` state.
    pub fn new(transport: &'a mut T, profile: FlashProfile) -> Self {
        Self {
            transport,
            profile,
            state: FlashState::Uninitialized,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FlashState {
        self.state
    }

    fn expect_state(&self, expected: FlashState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Flash(format!(
                "{operation} requires {expected:?} state, session is {:?}",
                self.state
            )))
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let data = self.transport.read_exact(1, self.profile.ack_timeout)?;
        Ok(data[0])
    }

    /// Wake the boot agent: the sync pattern must be answered by the
    /// profile's ack byte.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(FlashState::Uninitialized, "initialize")?;
        debug!("sending sync pattern ({} zeros)", self.profile.sync_zeros);
        for _ in 0..self.profile.sync_zeros {
            self.transport.write(&[0x00])?;
            thread::sleep(self.profile.sync_spacing);
        }
        thread::sleep(self.profile.poll_interval);
        let ack = self.read_byte()?;
        if ack != self.profile.sync_ack {
            return Err(Error::Flash(format!(
                "sync ack mismatch: expected {:#04x}, got {ack:#04x}",
                self.profile.sync_ack
            )));
        }
        self.state = FlashState::Initialized;
        info!("boot agent answered sync");
        Ok(())
    }

    /// Negotiate the programming speed and reconfigure the local end.
    pub fn set_speed(&mut self) -> Result<()> {
        self.expect_state(FlashState::Initialized, "set_speed")?;
        let baud = self.profile.programming_baud;
        let code = self
            .profile
            .speed_codes
            .iter()
            .find(|(b, _)| *b == baud)
            .map(|(_, c)| *c)
            .ok_or_else(|| Error::Flash(format!("unsupported programming speed {baud}")))?;
        debug!("negotiating {baud} baud (code {code:#04x})");
        self.transport.write(&[code])?;
        self.transport.set_speed(baud)?;
        thread::sleep(self.profile.poll_interval);
        let echo = self.read_byte()?;
        if echo != code {
            return Err(Error::Flash(format!(
                "speed code echo mismatch: sent {code:#04x}, got {echo:#04x}"
            )));
        }
        self.state = FlashState::SpeedSet;
        Ok(())
    }

    /// Unlock flash writes.
    pub fn unlock(&mut self) -> Result<()> {
        self.expect_state(FlashState::SpeedSet, "unlock")?;
        self.transport.write(&[CMD_UNLOCK])?;
        self.state = FlashState::Unlocked;
        Ok(())
    }

    /// Read the two status register bytes.
    pub fn status(&mut self) -> Result<(u8, u8)> {
        self.transport.write(&[CMD_STATUS_READ])?;
        let data = self.transport.read_exact(2, self.profile.ack_timeout)?;
        trace!("status {:#04x} {:#04x}", data[0], data[1]);
        Ok((data[0], data[1]))
    }

    /// Clear latched status register bits.
    pub fn status_clear(&mut self) -> Result<()> {
        self.transport.write(&[CMD_STATUS_CLEAR])?;
        thread::sleep(self.profile.poll_interval);
        Ok(())
    }

    /// Poll the status register until the ready bit is set, then report
    /// whether any of `bits` is set.
    fn status_check(&mut self, bits: u8) -> Result<bool> {
        loop {
            let (srd, _) = self.status()?;
            if srd & self.profile.ready != 0 {
                return Ok(srd & bits != 0);
            }
            thread::sleep(self.profile.poll_interval);
        }
    }

    /// Erase the whole flash. An erase error bit is fatal, no retry.
    pub fn erase(&mut self) -> Result<()> {
        self.expect_state(FlashState::Unlocked, "erase")?;
        info!("erasing flash");
        self.transport.write(&[CMD_ERASE, CMD_ERASE_CONFIRM])?;
        if self.status_check(self.profile.erase_error)? {
            return Err(Error::Flash("erase error bit set".into()));
        }
        self.state = FlashState::Erased;
        Ok(())
    }

    /// Write one page and verify the program status.
    fn page_write(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let index = u16::try_from(index)
            .map_err(|_| Error::Flash(format!("page index {index} out of range")))?;
        let mut command = Vec::with_capacity(3 + data.len());
        command.push(CMD_PAGE_WRITE);
        command.extend_from_slice(&index.to_be_bytes());
        command.extend_from_slice(data);
        self.transport.write(&command)?;
        thread::sleep(self.profile.poll_interval);
        if self.status_check(self.profile.program_error)? {
            return Err(Error::Flash(format!("program error at page {index}")));
        }
        Ok(())
    }

    /// Lock flash writes again; the session is complete afterwards.
    pub fn lock(&mut self) -> Result<()> {
        match self.state {
            FlashState::Erased | FlashState::Writing => {}
            _ => return Err(Error::Flash(format!("lock in {:?} state", self.state))),
        }
        self.transport.write(&[CMD_LOCK])?;
        self.state = FlashState::Locked;
        info!("flash locked");
        Ok(())
    }

    /// Run a whole programming session for `image`.
    ///
    /// `progress` is called with `(pages_written, pages_total)` after each
    /// page. On failure the error names the page reached; nothing is
    /// retried.
    pub fn program<F>(&mut self, image: &SRecordFile, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.initialize()?;
        self.set_speed()?;
        self.unlock()?;
        self.erase()?;

        let pages = image.pages(self.profile.page_size)?;
        let total = pages.total();
        info!("writing {total} pages of {} bytes", self.profile.page_size);
        self.state = FlashState::Writing;
        for (written, page) in pages.enumerate() {
            self.page_write(page.index(self.profile.page_size), &page.data)?;
            progress(written + 1, total);
        }
        self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    const READY: u8 = 0x80;

    fn test_profile() -> FlashProfile {
        let mut profile = FlashProfile::m32c87(19_200);
        profile.sync_spacing = Duration::ZERO;
        profile.poll_interval = Duration::ZERO;
        profile.ack_timeout = Duration::from_millis(10);
        profile
    }

    fn image() -> SRecordFile {
        // "AB" at 0x0100, "CD" at 0x0105: a single page at index 1
        SRecordFile::parse(["S1050100414276", "S105010543446D"]).unwrap()
    }

    fn two_page_image() -> SRecordFile {
        SRecordFile::parse(["S1050100414276", "S1050200434471"]).unwrap()
    }

    #[test]
    fn program_happy_path() {
        let mut t = MockTransport::with_reads([
            vec![0xb0],        // sync ack
            vec![0xb1],        // speed code echo (19200)
            vec![READY, 0x00], // erase status
            vec![READY, 0x00], // page status
        ]);
        let mut calls = Vec::new();
        {
            let mut programmer = FlashProgrammer::new(&mut t, test_profile());
            programmer
                .program(&image(), &mut |written, total| calls.push((written, total)))
                .unwrap();
            assert_eq!(programmer.state(), FlashState::Locked);
        }
        assert_eq!(calls, [(1, 1)]);
        assert_eq!(t.speed(), Some(19_200));

        let written = t.written().to_vec();
        // sync zeros, speed code, unlock, erase, status read
        assert_eq!(&written[..16], &[0u8; 16]);
        assert_eq!(written[16], 0xb1);
        assert_eq!(written[17], 0x7a);
        assert_eq!(&written[18..20], &[0xa7, 0xd0]);
        assert_eq!(written[20], 0x70);
        // page write command: 0x41, page index 1 big-endian, 256 bytes
        assert_eq!(&written[21..24], &[0x41, 0x00, 0x01]);
        assert_eq!(written[24..24 + 2], *b"AB");
        assert_eq!(&written[24 + 2..24 + 5], &[0xFF; 3]);
        assert_eq!(written[24 + 5..24 + 7], *b"CD");
        // status read after the page, then lock
        assert_eq!(written[24 + 256], 0x70);
        assert_eq!(written[24 + 257], 0x75);
        assert_eq!(written.len(), 24 + 258);
    }

    #[test]
    fn bad_sync_ack_is_fatal() {
        let mut t = MockTransport::with_reads([vec![0x42]]);
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        assert!(matches!(programmer.initialize(), Err(Error::Flash(_))));
        assert_eq!(programmer.state(), FlashState::Uninitialized);
    }

    #[test]
    fn speed_echo_mismatch_is_fatal() {
        let mut t = MockTransport::with_reads([vec![0xb0], vec![0xb4]]);
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        programmer.initialize().unwrap();
        assert!(matches!(programmer.set_speed(), Err(Error::Flash(_))));
    }

    #[test]
    fn erase_error_bit_aborts_before_writing() {
        let mut t = MockTransport::with_reads([
            vec![0xb0],
            vec![0xb1],
            vec![READY | 0x20, 0x00], // erase error bit
        ]);
        let mut calls = 0usize;
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        let result = programmer.program(&image(), &mut |_, _| calls += 1);
        assert!(matches!(result, Err(Error::Flash(_))));
        // never reached Writing, no page was sent, no progress reported
        assert_eq!(programmer.state(), FlashState::Unlocked);
        assert_eq!(calls, 0);
    }

    #[test]
    fn program_error_names_the_page() {
        let mut t = MockTransport::with_reads([
            vec![0xb0],
            vec![0xb1],
            vec![READY, 0x00],        // erase ok
            vec![READY, 0x00],        // page 1 ok
            vec![READY | 0x10, 0x00], // page 2 program error
        ]);
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        let result = programmer.program(&two_page_image(), &mut |_, _| {});
        match result {
            Err(Error::Flash(message)) => assert!(message.contains("page 2"), "{message}"),
            other => panic!("expected flash error, got {other:?}"),
        }
    }

    #[test]
    fn status_polls_until_ready() {
        let mut t = MockTransport::with_reads([
            vec![0x00, 0x00], // busy
            vec![0x00, 0x00], // busy
            vec![READY, 0x00],
        ]);
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        assert!(!programmer.status_check(0x20).unwrap());
        // one status-read command per poll
        assert_eq!(t.written(), [0x70, 0x70, 0x70]);
    }

    #[test]
    fn status_clear_writes_the_clear_command() {
        let mut t = MockTransport::new();
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        programmer.status_clear().unwrap();
        assert_eq!(t.written(), [0x50]);
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut t = MockTransport::new();
        let mut programmer = FlashProgrammer::new(&mut t, test_profile());
        assert!(programmer.unlock().is_err());
        assert!(programmer.erase().is_err());
        assert!(programmer.lock().is_err());
        assert!(programmer.set_speed().is_err());
    }

    #[test]
    fn unsupported_speed_is_rejected() {
        let mut t = MockTransport::with_reads([vec![0xb0]]);
        let mut profile = test_profile();
        profile.programming_baud = 12_345;
        let mut programmer = FlashProgrammer::new(&mut t, profile);
        programmer.initialize().unwrap();
        assert!(matches!(programmer.set_speed(), Err(Error::Flash(_))));
    }
}
