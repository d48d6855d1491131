//! chatroom: a multi-client line-oriented TCP chat server.
//!
//! Every line a client sends is relayed to every other connected client.
//! Features:
//! - Join, departure and operator announcements
//! - `@#` system command: number of people online (sender only)
//! - Single-threaded mio event loop with bounded non-blocking writes
//! - Configuration via CLI arguments or TOML file
//!
//! The `chatroom-client` binary is a terminal client for the same protocol.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;

pub use config::Config;
pub use error::{ChatError, Result};
pub use runtime::{Server, ShutdownHandle};
