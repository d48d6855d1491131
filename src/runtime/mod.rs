//! Single-threaded, readiness-driven chat runtime.
//!
//! Built on mio (epoll on Linux, kqueue on macOS). Components:
//! - `ConnectionRegistry`: slab of live client connections
//! - `OutboundQueue`: bounded per-connection write buffering
//! - `broadcast`: fan-out of one message to every other connection
//! - `AdminConsole`: operator announcements from standard input
//! - `Server`: the poll loop tying them together

mod admin;
mod broadcast;
mod buffer;
mod connection;
mod event_loop;

#[cfg(test)]
mod mock;

pub use admin::{AdminConsole, AdminRead};
pub use broadcast::{broadcast, send_to, DeliveryReport, Message, Origin};
pub use buffer::{FlushStatus, OutboundQueue};
pub use connection::{ConnId, Connection, ConnectionLimits, ConnectionRegistry, ReadOutcome};
pub use event_loop::{Server, ShutdownHandle};

use crate::config::Config;
use crate::error::Result;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use tracing::{info, warn};

/// Run the server until SIGINT/SIGTERM or a fatal error.
pub fn run(config: &Config) -> Result<()> {
    let mut server = Server::bind(config)?;

    if config.admin_console {
        match AdminConsole::stdin(config.max_line_length)
            .and_then(|console| server.attach_admin(console))
        {
            Ok(()) => info!("Operator console attached to standard input"),
            Err(e) => warn!(error = %e, "Running without operator console"),
        }
    }

    let shutdown = server.shutdown_handle();
    signal_hook::flag::register(SIGINT, shutdown.flag())?;
    signal_hook::flag::register(SIGTERM, shutdown.flag())?;

    server.run()
}
