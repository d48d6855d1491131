//! Terminal chat client.
//!
//! Multiplexes keyboard input and the server socket: typed lines go out
//! wrapped in the `<host:port>: ` envelope, incoming lines are printed with
//! the time they arrived.

use crate::protocol::{line_text, LineBuffer};
use bytes::BytesMut;
use chrono::{DateTime, Local};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const READ_SIZE: usize = 1024;
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server closed the connection.
    ServerClosed,
    /// Keyboard input reached end of file.
    InputClosed,
}

/// Wrap typed text in the sender envelope the server expects.
pub fn format_envelope(local: SocketAddr, text: &str) -> String {
    format!("<{local}>: {}\n", text.trim_end_matches(['\r', '\n']))
}

/// Prefix a received line with its receipt time, `ctime` style.
pub fn stamp(at: DateTime<Local>, line: &[u8]) -> String {
    format!(
        "[{}] {}\n",
        at.format("%a %b %e %H:%M:%S %Y"),
        String::from_utf8_lossy(line_text(line))
    )
}

/// Relay between `input`/`output` and the server until either side ends.
pub async fn run_session<S, I, O>(
    stream: S,
    local: SocketAddr,
    input: I,
    mut output: O,
) -> io::Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut keyboard = BufReader::new(input).lines();
    let mut inbound = LineBuffer::new(MAX_LINE_LENGTH);
    let mut chunk = BytesMut::with_capacity(READ_SIZE);

    loop {
        tokio::select! {
            read = reader.read_buf(&mut chunk) => {
                if read? == 0 {
                    if let Some(rest) = inbound.take_remainder() {
                        output.write_all(stamp(Local::now(), &rest).as_bytes()).await?;
                    }
                    output.flush().await?;
                    return Ok(SessionEnd::ServerClosed);
                }

                inbound.push(&chunk);
                chunk.clear();
                for line in inbound.drain_lines() {
                    output.write_all(stamp(Local::now(), &line).as_bytes()).await?;
                }
                output.flush().await?;
            }
            typed = keyboard.next_line() => {
                match typed? {
                    Some(text) => {
                        writer.write_all(format_envelope(local, &text).as_bytes()).await?;
                        writer.flush().await?;
                    }
                    None => return Ok(SessionEnd::InputClosed),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_format_envelope() {
        let local: SocketAddr = "127.0.0.1:50123".parse().unwrap();
        assert_eq!(format_envelope(local, "hello"), "<127.0.0.1:50123>: hello\n");
        assert_eq!(format_envelope(local, "@#\r\n"), "<127.0.0.1:50123>: @#\n");
    }

    #[test]
    fn test_stamp() {
        let at = Local.with_ymd_and_hms(2026, 10, 19, 9, 5, 7).unwrap();
        assert_eq!(
            stamp(at, b"Welcome to chat room [8000]\r\n"),
            "[Mon Oct 19 09:05:07 2026] Welcome to chat room [8000]\n"
        );
    }

    async fn connect_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_prints_until_server_closes() {
        let (client, mut server) = connect_pair().await;
        let local = client.local_addr().unwrap();

        server
            .write_all(b"Welcome to chat room [8000]\r\n<10.0.0.2:4000> joined")
            .await
            .unwrap();
        drop(server);

        // Keyboard that never types anything within the test
        let keyboard = tokio_test::io::Builder::new()
            .wait(Duration::from_secs(30))
            .build();
        let mut screen = Vec::new();

        let end = run_session(client, local, keyboard, &mut screen).await.unwrap();
        assert_eq!(end, SessionEnd::ServerClosed);

        let screen = String::from_utf8(screen).unwrap();
        let lines: Vec<&str> = screen.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] Welcome to chat room [8000]"));
        assert!(lines[1].ends_with("] <10.0.0.2:4000> joined"));
    }

    #[tokio::test]
    async fn test_sends_typed_lines_in_envelope() {
        let (client, server) = connect_pair().await;
        let local = client.local_addr().unwrap();

        let keyboard = tokio_test::io::Builder::new()
            .read(b"hello there\n")
            .read(b"@#\n")
            .build();
        let mut screen = Vec::new();

        let end = run_session(client, local, keyboard, &mut screen).await.unwrap();
        assert_eq!(end, SessionEnd::InputClosed);

        let mut received = tokio::io::BufReader::new(server).lines();
        assert_eq!(
            received.next_line().await.unwrap().unwrap(),
            format!("<{local}>: hello there")
        );
        assert_eq!(
            received.next_line().await.unwrap().unwrap(),
            format!("<{local}>: @#")
        );
        assert!(screen.is_empty());
    }
}
