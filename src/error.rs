//! Error types for the chat server.
//!
//! Per-connection failures are caught at the dispatcher's event boundary and
//! turned into a disconnect; only errors that reach `Server::run` are fatal.

use std::io;
use thiserror::Error;

/// Errors raised by the server runtime.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Socket or poller I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The connection registry is at capacity.
    #[error("connection limit reached ({limit})")]
    ResourceExhausted { limit: usize },

    /// A recipient's outbound queue would exceed its bound.
    #[error("outbound queue full ({queued} + {incoming} > {limit} bytes)")]
    OutboundOverflow {
        queued: usize,
        incoming: usize,
        limit: usize,
    },
}

pub type Result<T> = std::result::Result<T, ChatError>;
