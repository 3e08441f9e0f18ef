//! Length-prefixed binary packet reassembly with checksum and NAK retry.
//!
//! The binary tracklog protocol frames data as
//!
//! ```text
//! +---------+--------+------------------+----------+
//! | id      | length |     payload      | checksum |
//! +---------+--------+------------------+----------+
//! | u16 LE  | 1 byte |   length bytes   | 1 byte   |
//! +---------+--------+------------------+----------+
//! ```
//!
//! where the checksum is the XOR of the length byte and every payload byte.
//! A reserved id marks end of stream and carries no length, payload or
//! checksum. The framer acknowledges every good frame with a single ACK
//! byte and answers a corrupt frame with a single NAK byte, discarding it
//! and letting the instrument resend.
//!
//! Bytes arrive in arbitrary chunks; the framer accumulates them in an
//! internal buffer and only suspends inside [`Transport::read`]. No packet
//! is ever delivered with a failing checksum.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{READ_CHUNK, Transport};

/// Wire constants for one binary protocol dialect.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// The id that marks end of stream.
    pub terminator_id: u16,
    /// Byte written after a good frame.
    pub ack: u8,
    /// Byte written after a corrupt frame.
    pub nak: u8,
    /// Corrupt frames tolerated per delivered frame before giving up.
    ///
    /// A permanently desynchronized link would otherwise NAK forever.
    pub max_retries: u32,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            terminator_id: 0xa3a3,
            ack: 0xb1,
            nak: 0xb2,
            max_retries: 8,
        }
    }
}

/// A validated binary packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet id.
    pub id: u16,
    /// Payload bytes (checksum already verified and stripped).
    pub payload: Vec<u8>,
}

/// One framing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A validated packet.
    Data(Packet),
    /// The end-of-stream marker.
    End,
}

/// Stateful packet reassembler over a [`Transport`].
pub struct PacketFramer<'a, T: Transport> {
    transport: &'a mut T,
    config: FramerConfig,
    buffer: Vec<u8>,
}

impl<'a, T: Transport> PacketFramer<'a, T> {
    /// Create a framer with the default tracklog-protocol constants.
    pub fn new(transport: &'a mut T) -> Self {
        Self::with_config(transport, FramerConfig::default())
    }

    /// Create a framer with explicit wire constants.
    pub fn with_config(transport: &'a mut T, config: FramerConfig) -> Self {
        Self {
            transport,
            config,
            buffer: Vec::new(),
        }
    }

    /// Bytes buffered but not yet consumed by a frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn fill_to(&mut self, n: usize, timeout: Duration) -> Result<()> {
        while self.buffer.len() < n {
            let chunk = self.transport.read(READ_CHUNK, timeout)?;
            self.buffer.extend_from_slice(&chunk);
        }
        Ok(())
    }

    /// Read the next frame, NAKing corrupt ones until a good frame or the
    /// end marker arrives.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let mut rejected = 0;
        loop {
            self.fill_to(2, timeout)?;
            let id = LittleEndian::read_u16(&self.buffer[..2]);
            if id == self.config.terminator_id {
                self.buffer.drain(..2);
                trace!("frame: end of stream");
                return Ok(Frame::End);
            }

            self.fill_to(4, timeout)?;
            let length = usize::from(self.buffer[2]);
            self.fill_to(4 + length, timeout)?;

            let payload = &self.buffer[3..3 + length];
            let computed = payload
                .iter()
                .fold(self.buffer[2], |acc, b| acc ^ b);
            let received = self.buffer[3 + length];

            if computed != received {
                debug!(
                    "frame {id:#06x}: checksum mismatch (computed {computed:#04x}, received {received:#04x}), sending NAK"
                );
                self.transport.write(&[self.config.nak])?;
                self.buffer.drain(..4 + length);
                rejected += 1;
                if rejected > self.config.max_retries {
                    return Err(Error::Protocol(format!(
                        "{rejected} corrupt frames in a row, link desynchronized"
                    )));
                }
                continue;
            }

            let packet = Packet {
                id,
                payload: payload.to_vec(),
            };
            self.buffer.drain(..4 + length);
            self.transport.write(&[self.config.ack])?;
            trace!("frame {:#06x}: {} payload bytes", packet.id, packet.payload.len());
            return Ok(Frame::Data(packet));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn frame_bytes(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![(id & 0xff) as u8, (id >> 8) as u8, payload.len() as u8];
        out.extend_from_slice(payload);
        let checksum = payload.iter().fold(payload.len() as u8, |acc, b| acc ^ b);
        out.push(checksum);
        out
    }

    #[test]
    fn whole_frame_in_one_read() {
        let mut t = MockTransport::with_reads([frame_bytes(0xa1a1, b"abc")]);
        let mut framer = PacketFramer::new(&mut t);
        let frame = framer.read_frame(TIMEOUT).unwrap();
        assert_eq!(
            frame,
            Frame::Data(Packet {
                id: 0xa1a1,
                payload: b"abc".to_vec()
            })
        );
        assert_eq!(t.written(), [0xb1]);
    }

    #[test]
    fn split_frame_equals_whole_frame() {
        let bytes = frame_bytes(0xa1a1, b"abcdef");
        let (head, tail) = bytes.split_at(3);
        let mut t = MockTransport::with_reads([head.to_vec(), tail.to_vec()]);
        let mut framer = PacketFramer::new(&mut t);
        let split = framer.read_frame(TIMEOUT).unwrap();

        let mut t2 = MockTransport::with_reads([bytes]);
        let mut framer2 = PacketFramer::new(&mut t2);
        let whole = framer2.read_frame(TIMEOUT).unwrap();

        assert_eq!(split, whole);
    }

    #[test]
    fn corrupt_checksum_naks_then_recovers() {
        let mut bad = frame_bytes(0xa2a2, b"xyz");
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let good = frame_bytes(0xa2a2, b"xyz");
        let mut t = MockTransport::with_reads([bad, good]);
        let mut framer = PacketFramer::new(&mut t);

        let frame = framer.read_frame(TIMEOUT).unwrap();
        assert_eq!(
            frame,
            Frame::Data(Packet {
                id: 0xa2a2,
                payload: b"xyz".to_vec()
            })
        );
        // exactly one NAK for the corrupt frame, then one ACK
        assert_eq!(t.written(), [0xb2, 0xb1]);
    }

    #[test]
    fn terminator_yields_end() {
        let mut t = MockTransport::with_reads([vec![0xa3, 0xa3]]);
        let mut framer = PacketFramer::new(&mut t);
        assert_eq!(framer.read_frame(TIMEOUT).unwrap(), Frame::End);
        // no ACK for the bare terminator
        assert!(t.written().is_empty());
    }

    #[test]
    fn empty_payload_frame() {
        let mut t = MockTransport::with_reads([frame_bytes(0xa0a0, b"")]);
        let mut framer = PacketFramer::new(&mut t);
        let frame = framer.read_frame(TIMEOUT).unwrap();
        assert_eq!(
            frame,
            Frame::Data(Packet {
                id: 0xa0a0,
                payload: Vec::new()
            })
        );
    }

    #[test]
    fn persistent_corruption_is_a_protocol_error() {
        let mut bad = frame_bytes(0xa1a1, b"abc");
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let chunks: Vec<Vec<u8>> = std::iter::repeat_with(|| bad.clone()).take(10).collect();
        let mut t = MockTransport::with_reads(chunks);
        let mut framer = PacketFramer::new(&mut t);
        match framer.read_frame(TIMEOUT) {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn back_to_back_frames_from_one_chunk() {
        let mut bytes = frame_bytes(0xa1a1, b"one");
        bytes.extend(frame_bytes(0xa2a2, b"two"));
        bytes.extend([0xa3, 0xa3]);
        let mut t = MockTransport::with_reads([bytes]);
        let mut framer = PacketFramer::new(&mut t);
        assert!(matches!(framer.read_frame(TIMEOUT).unwrap(), Frame::Data(p) if p.id == 0xa1a1));
        assert_eq!(framer.pending(), frame_bytes(0xa2a2, b"two").len() + 2);
        assert!(matches!(framer.read_frame(TIMEOUT).unwrap(), Frame::Data(p) if p.id == 0xa2a2));
        assert_eq!(framer.read_frame(TIMEOUT).unwrap(), Frame::End);
        assert_eq!(framer.pending(), 0);
    }
}
