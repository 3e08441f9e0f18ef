//! Request/response session over the sentence protocols.
//!
//! A [`CommandSession`] writes an encoded command and hands back the
//! response lines under one of three cardinality contracts:
//!
//! - [`each`](CommandSession::each): a lazy, finite sequence of parsed
//!   responses,
//! - [`none`](CommandSession::none): zero responses expected,
//! - [`one`](CommandSession::one): exactly one response expected.
//!
//! Two dialects exist. The flow-controlled dialect brackets every response
//! burst in out-of-band tokens: XOFF (0x13) right after the command, XON
//! (0x11) after the last line. The plain dialect has no tokens; there a
//! read timeout is the normal end-of-response signal, which is why
//! [`crate::error::Error::Timeout`] is not split into separate
//! "end of data" and "failure" types: the call site decides.
//!
//! On any error during an exchange the session flushes the transport's
//! receive buffer before propagating, so a half-consumed response never
//! corrupts the next command. Dropping a response iterator early simply
//! stops consuming; the next command should be preceded by a flush if the
//! burst was not read to its end.

use std::marker::PhantomData;
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::sentence;
use crate::transport::{READ_CHUNK, Transport};

/// Token marking the end of a response burst.
pub const XON: u8 = 0x11;

/// Token marking the start of a response burst.
pub const XOFF: u8 = 0x13;

/// One event on the logical line stream.
#[derive(Debug, PartialEq, Eq)]
enum LineEvent {
    Line(String),
    Xon,
    Xoff,
}

/// Request/response session over a [`Transport`].
pub struct CommandSession<'a, T: Transport> {
    transport: &'a mut T,
    buffer: Vec<u8>,
    flow_control: bool,
}

impl<'a, T: Transport> CommandSession<'a, T> {
    /// Session for the plain dialect (no flow-control tokens).
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
            flow_control: false,
        }
    }

    /// Session for the flow-controlled dialect (XOFF/XON bracketing).
    pub fn with_flow_control(transport: &'a mut T) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
            flow_control: true,
        }
    }

    /// Encode and write a command sentence.
    pub fn write_command(&mut self, payload: &str) -> Result<()> {
        let framed = sentence::encode(payload)?;
        debug!("command {payload:?}");
        self.transport.write(&framed)
    }

    /// Discard session and transport receive state.
    pub fn flush(&mut self) -> Result<()> {
        self.buffer.clear();
        self.transport.flush()
    }

    fn fill(&mut self, timeout: Duration) -> Result<()> {
        let chunk = self.transport.read(READ_CHUNK, timeout)?;
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    /// Read the next line or flow-control token.
    fn read_event(&mut self, timeout: Duration) -> Result<LineEvent> {
        loop {
            if self.buffer.is_empty() {
                self.fill(timeout)?;
                continue;
            }
            if self.flow_control {
                match self.buffer[0] {
                    XON => {
                        self.buffer.remove(0);
                        trace!("read XON");
                        return Ok(LineEvent::Xon);
                    }
                    XOFF => {
                        self.buffer.remove(0);
                        trace!("read XOFF");
                        return Ok(LineEvent::Xoff);
                    }
                    _ => {}
                }
            }
            if let Some(index) = self.buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=index).collect();
                let line = String::from_utf8_lossy(&raw).into_owned();
                trace!("read line {line:?}");
                return Ok(LineEvent::Line(line));
            }
            self.fill(timeout)?;
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        // a half-consumed response must not leak into the next exchange
        let _ = self.flush();
        error
    }

    /// Write `command` and iterate its parsed responses.
    ///
    /// Each response line is sentence-decoded and handed to `parser`; a
    /// line the parser rejects fails the exchange with a protocol error
    /// carrying that line.
    pub fn each<R, P>(
        &mut self,
        command: &str,
        parser: P,
        timeout: Duration,
    ) -> Result<Responses<'_, 'a, T, P, R>>
    where
        P: FnMut(&str) -> Option<R>,
    {
        self.start(command, timeout)?;
        Ok(Responses {
            session: self,
            parser,
            timeout,
            done: false,
            _marker: PhantomData,
        })
    }

    /// Write `command` and iterate its raw response lines, line endings
    /// included and envelope untouched.
    pub fn raw_each(&mut self, command: &str, timeout: Duration) -> Result<RawResponses<'_, 'a, T>> {
        self.start(command, timeout)?;
        Ok(RawResponses {
            session: self,
            timeout,
            done: false,
        })
    }

    fn start(&mut self, command: &str, timeout: Duration) -> Result<()> {
        self.write_command(command)?;
        if self.flow_control {
            match self.read_event(timeout) {
                Ok(LineEvent::Xoff) => Ok(()),
                Ok(event) => Err(self.fail(Error::Protocol(format!(
                    "expected XOFF after command {command:?}, got {event:?}"
                )))),
                Err(e) => Err(self.fail(e)),
            }
        } else {
            Ok(())
        }
    }

    /// Write `command` and require an empty response.
    ///
    /// In the plain dialect this waits out one timeout to confirm silence.
    pub fn none(&mut self, command: &str, timeout: Duration) -> Result<()> {
        let mut responses = self.each(command, |line| Some(line.to_string()), timeout)?;
        match responses.next() {
            None => Ok(()),
            Some(Ok(line)) => {
                drop(responses);
                Err(self.fail(Error::Protocol(format!(
                    "unexpected response {line:?} to {command:?}"
                ))))
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Write `command` and require exactly one parsed response.
    pub fn one<R, P>(&mut self, command: &str, parser: P, timeout: Duration) -> Result<R>
    where
        P: FnMut(&str) -> Option<R>,
    {
        let mut responses = self.each(command, parser, timeout)?;
        let first = match responses.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return Err(e),
            None => {
                drop(responses);
                return Err(self.fail(Error::Protocol(format!("no response to {command:?}"))));
            }
        };
        match responses.next() {
            None => Ok(first),
            Some(Ok(_)) => {
                drop(responses);
                Err(self.fail(Error::Protocol(format!(
                    "more than one response to {command:?}"
                ))))
            }
            Some(Err(e)) => Err(e),
        }
    }
}

/// Lazy sequence of parsed responses; see [`CommandSession::each`].
pub struct Responses<'s, 'a, T: Transport, P, R> {
    session: &'s mut CommandSession<'a, T>,
    parser: P,
    timeout: Duration,
    done: bool,
    _marker: PhantomData<R>,
}

impl<T: Transport, P, R> Iterator for Responses<'_, '_, T, P, R>
where
    P: FnMut(&str) -> Option<R>,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.read_event(self.timeout) {
            Err(e) if e.is_timeout() && !self.session.flow_control => {
                // plain dialect: silence is the terminator
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(self.session.fail(e)))
            }
            Ok(LineEvent::Xon) => {
                self.done = true;
                None
            }
            Ok(LineEvent::Xoff) => {
                self.done = true;
                Some(Err(self.session.fail(Error::Protocol(
                    "unexpected XOFF inside response burst".into(),
                ))))
            }
            Ok(LineEvent::Line(line)) => {
                let payload = match sentence::decode(&line) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(self.session.fail(e)));
                    }
                };
                match (self.parser)(&payload) {
                    Some(value) => Some(Ok(value)),
                    None => {
                        self.done = true;
                        Some(Err(self.session.fail(Error::Protocol(format!(
                            "unparseable response {payload:?}"
                        )))))
                    }
                }
            }
        }
    }
}

/// Lazy sequence of raw response lines; see [`CommandSession::raw_each`].
pub struct RawResponses<'s, 'a, T: Transport> {
    session: &'s mut CommandSession<'a, T>,
    timeout: Duration,
    done: bool,
}

impl<T: Transport> Iterator for RawResponses<'_, '_, T> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.read_event(self.timeout) {
            Err(e) if e.is_timeout() && !self.session.flow_control => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(self.session.fail(e)))
            }
            Ok(LineEvent::Xon) => {
                self.done = true;
                None
            }
            Ok(LineEvent::Xoff) => {
                self.done = true;
                Some(Err(self.session.fail(Error::Protocol(
                    "unexpected XOFF inside response burst".into(),
                ))))
            }
            Ok(LineEvent::Line(line)) => Some(Ok(line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn framed(payload: &str) -> Vec<u8> {
        sentence::encode(payload).unwrap()
    }

    #[test]
    fn each_with_flow_control() {
        let mut reads = vec![vec![XOFF]];
        reads.push(framed("PBRWPS,A"));
        reads.push(framed("PBRWPS,B"));
        reads.push(vec![XON]);
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::with_flow_control(&mut t);

        let items: Vec<String> = session
            .each("PBRWPS,", |l| Some(l.to_string()), TIMEOUT)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(items, ["PBRWPS,A", "PBRWPS,B"]);
        assert_eq!(t.written(), framed("PBRWPS,"));
    }

    #[test]
    fn tokens_arrive_inside_one_chunk() {
        // XOFF, both lines and XON may land in a single read
        let mut chunk = vec![XOFF];
        chunk.extend(framed("PBRSNP,a,b,c,d"));
        chunk.push(XON);
        let mut t = MockTransport::with_reads([chunk]);
        let mut session = CommandSession::with_flow_control(&mut t);

        let snp = session
            .one("PBRSNP,", |l| Some(l.to_string()), TIMEOUT)
            .unwrap();
        assert_eq!(snp, "PBRSNP,a,b,c,d");
    }

    #[test]
    fn missing_xoff_is_a_protocol_error() {
        let mut t = MockTransport::with_reads([framed("PBRANS,1")]);
        let mut session = CommandSession::with_flow_control(&mut t);
        let result = session.none("PBRCONF,", TIMEOUT);
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(t.flushes(), 1);
    }

    #[test]
    fn parser_rejection_flushes_and_fails() {
        let mut reads = vec![vec![XOFF]];
        reads.push(framed("GARBAGE"));
        reads.push(vec![XON]);
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::with_flow_control(&mut t);

        let result: Result<Vec<u32>> = session
            .each("PBRTL,", |l| l.strip_prefix("PBRTL,").and_then(|r| r.parse().ok()), TIMEOUT)
            .unwrap()
            .collect();
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(t.flushes(), 1);
    }

    #[test]
    fn corrupt_sentence_flushes_and_fails() {
        let mut reads = vec![vec![XOFF]];
        reads.push(b"$PBRSNP,*20\r\n".to_vec());
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::with_flow_control(&mut t);

        let result: Result<Vec<String>> = session
            .each("PBRSNP,", |l| Some(l.to_string()), TIMEOUT)
            .unwrap()
            .collect();
        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(t.flushes(), 1);
    }

    #[test]
    fn none_rejects_any_response() {
        let mut reads = vec![vec![XOFF]];
        reads.push(framed("PBRANS,0"));
        reads.push(vec![XON]);
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::with_flow_control(&mut t);
        assert!(matches!(
            session.none("PBRWPR,X", TIMEOUT),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn none_accepts_silence() {
        let mut t = MockTransport::with_reads([vec![XOFF], vec![XON]]);
        let mut session = CommandSession::with_flow_control(&mut t);
        session.none("PBRWPR,X", TIMEOUT).unwrap();
    }

    #[test]
    fn one_rejects_zero_and_two() {
        let mut t = MockTransport::with_reads([vec![XOFF], vec![XON]]);
        let mut session = CommandSession::with_flow_control(&mut t);
        assert!(matches!(
            session.one("PBRSNP,", |l| Some(l.to_string()), TIMEOUT),
            Err(Error::Protocol(_))
        ));

        let mut reads = vec![vec![XOFF]];
        reads.push(framed("PBRSNP,a"));
        reads.push(framed("PBRSNP,b"));
        reads.push(vec![XON]);
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::with_flow_control(&mut t);
        assert!(matches!(
            session.one("PBRSNP,", |l| Some(l.to_string()), TIMEOUT),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn plain_dialect_ends_on_timeout() {
        let mut reads = vec![framed("PFMWPL,one")];
        reads.push(framed("PFMWPL,two"));
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::new(&mut t);

        let items: Vec<String> = session
            .each("PFMWPL,", |l| Some(l.to_string()), TIMEOUT)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(items, ["PFMWPL,one", "PFMWPL,two"]);
        // the terminating timeout is not an error, so nothing was flushed
        assert_eq!(t.flushes(), 0);
    }

    #[test]
    fn raw_each_preserves_envelope() {
        let mut reads = vec![vec![XOFF]];
        reads.push(b"B1122334455\r\n".to_vec());
        reads.push(vec![XON]);
        let mut t = MockTransport::with_reads(reads);
        let mut session = CommandSession::with_flow_control(&mut t);

        let lines: Vec<String> = session
            .raw_each("PBRTR,01", TIMEOUT)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(lines, ["B1122334455\r\n"]);
    }

    #[test]
    fn line_split_across_reads() {
        let framed_line = framed("PFMSNP,x");
        let (head, tail) = framed_line.split_at(4);
        let mut t = MockTransport::with_reads([head.to_vec(), tail.to_vec()]);
        let mut session = CommandSession::new(&mut t);

        let item = session
            .one("PFMSNP,", |l| Some(l.to_string()), TIMEOUT)
            .unwrap();
        assert_eq!(item, "PFMSNP,x");
    }
}
