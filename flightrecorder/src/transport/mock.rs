//! Scripted in-memory transport for tests.
//!
//! Reads are served from a queue of pre-recorded chunks, one chunk per
//! `read` call, which makes it easy to exercise partial-frame reassembly:
//! each queued chunk arrives as if it were a separate burst on the wire.
//! Writes are recorded for later inspection.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// An in-memory [`Transport`] driven by a script of read chunks.
#[derive(Debug, Default)]
pub struct MockTransport {
    reads: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    flushes: usize,
    speed: Option<u32>,
}

impl MockTransport {
    /// Create an empty mock; every read will time out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that serves the given chunks, one per read call.
    #[must_use]
    pub fn with_reads<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            reads: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Queue another chunk to be returned by a future read.
    pub fn push_read(&mut self, chunk: impl Into<Vec<u8>>) {
        self.reads.push_back(chunk.into());
    }

    /// Everything written so far, in order.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Number of times `flush` was called.
    #[must_use]
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Last speed passed to `set_speed`, if any.
    #[must_use]
    pub fn speed(&self) -> Option<u32> {
        self.speed
    }

    /// Whether the read script has been fully consumed.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.reads.is_empty()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let Some(front) = self.reads.front().map(Vec::len) else {
            return Err(Error::Timeout(timeout));
        };
        if front <= max {
            Ok(self.reads.pop_front().unwrap_or_default())
        } else {
            let head = self
                .reads
                .front_mut()
                .map(|chunk| chunk.drain(..max).collect())
                .unwrap_or_default();
            Ok(head)
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        self.reads.clear();
        Ok(())
    }

    fn set_speed(&mut self, baud: u32) -> Result<()> {
        self.speed = Some(baud);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
