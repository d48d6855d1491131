//! In-memory socket stand-in for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Scripted non-blocking stream.
///
/// Reads hand out fed chunks, then either `WouldBlock` or EOF once
/// `close_read` was called. Writes accept up to `budget` bytes in total
/// before returning `WouldBlock`, or fail outright once `break_pipe` was
/// called.
#[derive(Debug, Default)]
pub(crate) struct MockStream {
    input: VecDeque<Vec<u8>>,
    read_closed: bool,
    written: Vec<u8>,
    budget: Option<usize>,
    broken: bool,
    max_iovecs_seen: usize,
}

impl MockStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.input.push_back(data.to_vec());
    }

    pub(crate) fn close_read(&mut self) {
        self.read_closed = true;
    }

    /// Limit how many more bytes writes accept; `None` means unlimited.
    pub(crate) fn set_budget(&mut self, budget: Option<usize>) {
        self.budget = budget;
    }

    pub(crate) fn break_pipe(&mut self) {
        self.broken = true;
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn max_iovecs_seen(&self) -> usize {
        self.max_iovecs_seen
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(chunk) = self.input.front_mut() else {
            return if self.read_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            self.input.pop_front();
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let n = match self.budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };

        self.written.extend_from_slice(&buf[..n]);
        if let Some(budget) = self.budget.as_mut() {
            *budget -= n;
        }
        Ok(n)
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.max_iovecs_seen = self.max_iovecs_seen.max(bufs.len());

        let mut total = 0;
        for buf in bufs {
            match self.write(buf) {
                Ok(n) => {
                    total += n;
                    if n < buf.len() {
                        break;
                    }
                }
                Err(e) if total == 0 => return Err(e),
                Err(_) => break,
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
