//! Server-generated announcement text.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Display;
use std::net::SocketAddr;

/// Prefix that sets operator lines apart from client chat.
pub const OPERATOR_PREFIX: &str = "From admin: ";

/// Sent to a new connection only.
pub fn format_welcome(server_label: impl Display) -> Bytes {
    Bytes::from(format!("Welcome to chat room [{server_label}]\r\n"))
}

/// Broadcast to everyone else when `addr` connects.
pub fn format_join(addr: SocketAddr, server_label: impl Display) -> Bytes {
    Bytes::from(format!("<{addr}> joined chat room [{server_label}]\r\n"))
}

/// Broadcast to everyone left when `addr` goes away.
pub fn format_leave(addr: SocketAddr) -> Bytes {
    Bytes::from(format!("<{addr}> left the chat room\r\n"))
}

/// Reply to the `@#` command.
pub fn format_count(online: usize) -> Bytes {
    Bytes::from(format!("There are {online} people in the chat room\r\n"))
}

/// Operator announcement built from one line of console input.
pub fn format_operator(text: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(OPERATOR_PREFIX.len() + text.len() + 2);
    out.put_slice(OPERATOR_PREFIX.as_bytes());
    out.put_slice(text);
    out.put_slice(b"\r\n");
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.168.1.7:50123".parse().unwrap()
    }

    #[test]
    fn test_welcome_mentions_label() {
        assert_eq!(
            &format_welcome(9001)[..],
            b"Welcome to chat room [9001]\r\n"
        );
    }

    #[test]
    fn test_join_and_leave() {
        assert_eq!(
            &format_join(addr(), 8000)[..],
            b"<192.168.1.7:50123> joined chat room [8000]\r\n"
        );
        assert_eq!(
            &format_leave(addr())[..],
            b"<192.168.1.7:50123> left the chat room\r\n"
        );
    }

    #[test]
    fn test_count_and_operator() {
        assert_eq!(
            &format_count(3)[..],
            b"There are 3 people in the chat room\r\n"
        );
        assert_eq!(
            &format_operator(b"back in 5")[..],
            b"From admin: back in 5\r\n"
        );
    }
}
