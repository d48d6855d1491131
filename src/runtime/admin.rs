//! Operator console.
//!
//! Lines typed on the server's standard input (or any other descriptor
//! handed in) become operator announcements. The descriptor is watched by
//! the same poller as the sockets, so it is switched to non-blocking mode
//! while the console owns it and restored afterwards.

use crate::protocol::LineBuffer;
use bytes::Bytes;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::io;
use std::os::unix::io::RawFd;

/// Size of a single read from the console descriptor.
const ADMIN_READ_SIZE: usize = 1024;

/// Lines produced by one drain of the console.
#[derive(Debug, Default)]
pub struct AdminRead {
    /// Complete lines, delimiters included.
    pub lines: Vec<Bytes>,
    /// The input stream has ended.
    pub eof: bool,
}

/// Operator input source.
#[derive(Debug)]
pub struct AdminConsole {
    fd: RawFd,
    lines: LineBuffer,
    /// Descriptor flags to put back on drop, if we changed them.
    saved_flags: Option<libc::c_int>,
}

impl AdminConsole {
    /// Console on the process's standard input.
    pub fn stdin(max_line_length: usize) -> io::Result<Self> {
        Self::from_raw_fd(libc::STDIN_FILENO, max_line_length)
    }

    /// Console on an arbitrary descriptor.
    ///
    /// The descriptor is borrowed: the caller keeps it open for as long as
    /// the console exists.
    pub fn from_raw_fd(fd: RawFd, max_line_length: usize) -> io::Result<Self> {
        // SAFETY: fcntl on a caller-provided descriptor; failure is reported
        // through the return value.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }

        let saved_flags = if flags & libc::O_NONBLOCK == 0 {
            // SAFETY: as above.
            if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
                return Err(io::Error::last_os_error());
            }
            Some(flags)
        } else {
            None
        };

        Ok(Self {
            fd,
            lines: LineBuffer::new(max_line_length),
            saved_flags,
        })
    }

    /// Start watching the descriptor for readability.
    ///
    /// Fails for descriptors the poller cannot watch, such as regular files
    /// or `/dev/null` under epoll.
    pub fn register(&self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut SourceFd(&self.fd), token, Interest::READABLE)
    }

    pub fn deregister(&self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut SourceFd(&self.fd))
    }

    /// Read until the descriptor would block and return the complete lines.
    ///
    /// At end of stream any unterminated remainder is returned as a final
    /// line.
    pub fn read_lines(&mut self) -> io::Result<AdminRead> {
        let mut chunk = [0u8; ADMIN_READ_SIZE];
        let mut eof = false;

        loop {
            // SAFETY: `chunk` is valid for writes of `chunk.len()` bytes.
            let n = unsafe { libc::read(self.fd, chunk.as_mut_ptr().cast(), chunk.len()) };
            if n > 0 {
                self.lines.push(&chunk[..n as usize]);
                continue;
            }
            if n == 0 {
                eof = true;
                break;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => break,
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }

        let mut lines = self.lines.drain_lines();
        if eof {
            lines.extend(self.lines.take_remainder());
        }
        Ok(AdminRead { lines, eof })
    }
}

impl Drop for AdminConsole {
    fn drop(&mut self) {
        if let Some(flags) = self.saved_flags {
            // SAFETY: restores the flags read in `from_raw_fd`; errors are
            // ignored since the descriptor may already be closed.
            unsafe {
                libc::fcntl(self.fd, libc::F_SETFL, flags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_reads_lines_without_blocking() {
        let (mut operator, console_end) = UnixStream::pair().unwrap();
        let mut console = AdminConsole::from_raw_fd(console_end.as_raw_fd(), 256).unwrap();

        // Nothing typed yet: returns immediately
        let read = console.read_lines().unwrap();
        assert!(read.lines.is_empty());
        assert!(!read.eof);

        operator.write_all(b"first\nsecond\nthi").unwrap();
        let read = console.read_lines().unwrap();
        assert_eq!(
            read.lines,
            vec![Bytes::from_static(b"first\n"), Bytes::from_static(b"second\n")]
        );
        assert!(!read.eof);

        operator.write_all(b"rd").unwrap();
        drop(operator);
        let read = console.read_lines().unwrap();
        assert_eq!(read.lines, vec![Bytes::from_static(b"third")]);
        assert!(read.eof);
    }

    #[test]
    fn test_restores_blocking_mode_on_drop() {
        let (_operator, console_end) = UnixStream::pair().unwrap();
        let fd = console_end.as_raw_fd();

        let console = AdminConsole::from_raw_fd(fd, 256).unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);

        drop(console);
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_eq!(flags & libc::O_NONBLOCK, 0);
    }

    #[test]
    fn test_invalid_descriptor() {
        assert!(AdminConsole::from_raw_fd(-1, 256).is_err());
    }
}
