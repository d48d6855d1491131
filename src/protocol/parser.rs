//! Chat line parser.
//!
//! Lines are delimited by `\n` (optionally preceded by `\r`). Bytes that do
//! not end in a delimiter stay buffered until the next read completes them.

use bytes::{Bytes, BytesMut};

/// Result of pulling one line out of an input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete line, delimiter included.
    Line(Bytes),
    /// No complete line is buffered yet.
    PartialLine,
}

/// Split the first complete line off the front of `buf`.
///
/// A buffer holding `max_len` or more bytes without a delimiter is split at
/// `max_len` and returned as a line, so one client cannot grow its buffer
/// without bound.
pub fn decode_line(buf: &mut BytesMut, max_len: usize) -> Decoded {
    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        return Decoded::Line(buf.split_to(pos + 1).freeze());
    }

    if max_len > 0 && buf.len() >= max_len {
        return Decoded::Line(buf.split_to(max_len).freeze());
    }

    Decoded::PartialLine
}

/// Strip the trailing `\n` or `\r\n` from a decoded line.
pub fn line_text(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Accumulates socket reads and hands back complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_len: usize,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete line, if any.
    pub fn next_line(&mut self) -> Option<Bytes> {
        match decode_line(&mut self.buf, self.max_len) {
            Decoded::Line(line) => Some(line),
            Decoded::PartialLine => None,
        }
    }

    /// Drain every complete line currently buffered.
    pub fn drain_lines(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Take whatever partial line is left (used at end of stream).
    pub fn take_remainder(&mut self) -> Option<Bytes> {
        if self.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    /// Bytes of the unfinished line held back.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// In-band request for a server-side action instead of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// `@#`: how many clients are online.
    Count,
    /// `@$` or `@%`: recognized but has no effect.
    Reserved(u8),
}

impl SystemCommand {
    fn from_symbol(symbol: u8) -> Option<Self> {
        match symbol {
            b'#' => Some(SystemCommand::Count),
            b'$' | b'%' => Some(SystemCommand::Reserved(symbol)),
            _ => None,
        }
    }
}

/// Recognize `<host>:<port>: @X`, with or without angle brackets around the
/// address.
///
/// The whole line must have that shape; trailing whitespace is ignored.
/// Anything else, including text before the `@X` token or characters after
/// it, is ordinary chat.
pub fn match_command(line: &[u8]) -> Option<SystemCommand> {
    let line = line.trim_ascii_end();

    // ": @X" is four bytes, plus at least "h:1" before it
    if line.len() < 7 {
        return None;
    }

    let (envelope, token) = line.split_at(line.len() - 4);
    let symbol = match token {
        [b':', b' ', b'@', symbol] => *symbol,
        _ => return None,
    };

    let addr = match envelope {
        [b'<', inner @ .., b'>'] => inner,
        _ => envelope,
    };

    if !is_host_port(addr) {
        return None;
    }

    SystemCommand::from_symbol(symbol)
}

fn is_host_port(addr: &[u8]) -> bool {
    let colon = match addr.iter().rposition(|&b| b == b':') {
        Some(pos) => pos,
        None => return false,
    };
    let (host, port) = (&addr[..colon], &addr[colon + 1..]);

    !host.is_empty()
        && host
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        && (1..=5).contains(&port.len())
        && port.iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_line() {
        let mut buf = BytesMut::from(&b"hello\nworld\r\n"[..]);

        assert_eq!(
            decode_line(&mut buf, 1024),
            Decoded::Line(Bytes::from_static(b"hello\n"))
        );
        assert_eq!(
            decode_line(&mut buf, 1024),
            Decoded::Line(Bytes::from_static(b"world\r\n"))
        );
        assert_eq!(decode_line(&mut buf, 1024), Decoded::PartialLine);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut lines = LineBuffer::new(1024);

        lines.push(b"hel");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.len(), 3);

        lines.push(b"lo\nnext");
        assert_eq!(lines.next_line().unwrap(), Bytes::from_static(b"hello\n"));
        assert!(lines.next_line().is_none());
        assert_eq!(lines.take_remainder().unwrap(), Bytes::from_static(b"next"));
        assert!(lines.is_empty());
        assert!(lines.take_remainder().is_none());
    }

    #[test]
    fn test_drain_lines() {
        let mut lines = LineBuffer::new(1024);
        lines.push(b"a\nb\r\nc");
        assert_eq!(
            lines.drain_lines(),
            vec![Bytes::from_static(b"a\n"), Bytes::from_static(b"b\r\n")]
        );
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_overlong_line_is_split() {
        let mut lines = LineBuffer::new(4);
        lines.push(b"abcdefg");
        assert_eq!(lines.next_line().unwrap(), Bytes::from_static(b"abcd"));
        assert!(lines.next_line().is_none());
        lines.push(b"\n");
        assert_eq!(lines.next_line().unwrap(), Bytes::from_static(b"efg\n"));
    }

    #[test]
    fn test_line_text() {
        assert_eq!(line_text(b"hi\r\n"), b"hi");
        assert_eq!(line_text(b"hi\n"), b"hi");
        assert_eq!(line_text(b"hi"), b"hi");
        assert_eq!(line_text(b"\r\n"), b"");
    }

    #[test]
    fn test_match_count_command() {
        assert_eq!(
            match_command(b"<127.0.0.1:5555>: @#\n"),
            Some(SystemCommand::Count)
        );
        assert_eq!(
            match_command(b"127.0.0.1:5555: @#\r\n"),
            Some(SystemCommand::Count)
        );
        assert_eq!(
            match_command(b"<localhost:80>: @#   "),
            Some(SystemCommand::Count)
        );
    }

    #[test]
    fn test_match_reserved_symbols() {
        assert_eq!(
            match_command(b"<10.0.0.2:4000>: @$"),
            Some(SystemCommand::Reserved(b'$'))
        );
        assert_eq!(
            match_command(b"<10.0.0.2:4000>: @%"),
            Some(SystemCommand::Reserved(b'%'))
        );
    }

    #[test]
    fn test_near_misses_are_chat() {
        let misses: &[&[u8]] = &[
            b"@#",
            b": @#",
            b"<127.0.0.1:5555>: @!",
            b"<127.0.0.1:5555>: @#x",
            b"<127.0.0.1:5555>:@#",
            b"<127.0.0.1:5555>:  @#",
            b"<127.0.0.1:5555>: hello @#",
            b"<127.0.0.1>: @#",
            b"<127.0.0.1:port>: @#",
            b"<127.0.0.1:123456>: @#",
            b"<:5555>: @#",
            b"<127.0.0.1:5555: @#",
            b"<127.0.0.1:5555>: hello",
            b"",
        ];

        for line in misses {
            assert_eq!(
                match_command(line),
                None,
                "{:?}",
                String::from_utf8_lossy(line)
            );
        }
    }
}
