//! Per-connection outbound buffering.
//!
//! Sockets are non-blocking, so a broadcast never waits on a slow reader.
//! Whatever a socket does not take immediately is queued here and written
//! when the poller reports the socket writable again. The queue is bounded:
//! a client that falls `limit` bytes behind is treated as disconnected.
//!
//! Payloads are `Bytes`, so one broadcast line is shared by every queue it
//! lands in rather than copied per recipient.

use crate::error::{ChatError, Result};
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io::{self, IoSlice, Write};

/// Upper bound on slices handed to one `write_vectored` call.
const MAX_IOVECS: usize = 64;

/// Whether a flush emptied the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Everything was written.
    Drained,
    /// The socket would block with bytes still queued.
    Pending,
}

/// Bounded FIFO of bytes waiting to be written to one socket.
#[derive(Debug)]
pub struct OutboundQueue {
    chunks: VecDeque<Bytes>,
    /// Total bytes across `chunks`.
    queued: usize,
    limit: usize,
}

impl OutboundQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            queued: 0,
            limit,
        }
    }

    /// Append a payload.
    ///
    /// Fails without queueing anything if the payload would push the queue
    /// past its limit.
    pub fn push(&mut self, payload: Bytes) -> Result<()> {
        if self.queued + payload.len() > self.limit {
            return Err(ChatError::OutboundOverflow {
                queued: self.queued,
                incoming: payload.len(),
                limit: self.limit,
            });
        }

        if !payload.is_empty() {
            self.queued += payload.len();
            self.chunks.push_back(payload);
        }
        Ok(())
    }

    /// Write queued chunks with scatter-gather writes until the queue is
    /// empty or the writer would block.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<FlushStatus> {
        while !self.chunks.is_empty() {
            let written = {
                let slices: Vec<IoSlice<'_>> = self
                    .chunks
                    .iter()
                    .take(MAX_IOVECS)
                    .map(|chunk| IoSlice::new(chunk))
                    .collect();
                writer.write_vectored(&slices)
            };

            match written {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.consume(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::Pending);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(FlushStatus::Drained)
    }

    /// Drop `n` written bytes from the front.
    fn consume(&mut self, mut n: usize) {
        self.queued -= n;
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if n >= front.len() {
                n -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }

    /// Bytes waiting to be written.
    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn limit(&self) -> usize {
        self.limit
    }
}
