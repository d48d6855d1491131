//! Line protocol spoken between chat clients and the server.
//!
//! Clients send newline-terminated text lines of the form
//! `<host:port>: free text`. A line whose text is exactly one `@X` token
//! after the address is a system command and is answered by the server
//! instead of being relayed.
//!
//! ```text
//! Client:  <127.0.0.1:50123>: hello everyone\n
//! Others:  <127.0.0.1:50123>: hello everyone\n
//!
//! Client:  <127.0.0.1:50123>: @#\n
//! Client:  There are 3 people in the chat room\r\n   (sender only)
//! ```

pub mod announce;
pub mod parser;

pub use announce::{format_count, format_join, format_leave, format_operator, format_welcome};
pub use parser::{decode_line, line_text, match_command, Decoded, LineBuffer, SystemCommand};
