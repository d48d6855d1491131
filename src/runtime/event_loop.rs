//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when the listener, the operator
//! console or a client socket is ready, then we perform non-blocking
//! accept/read/write syscalls. Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread and each event is handled to completion
//! before the next one, so the registry needs no locking. Connections that
//! fail during a delivery pass are only removed after the pass, then their
//! departure is announced with a pass of its own.

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{
    format_count, format_join, format_leave, format_operator, format_welcome, line_text,
    match_command, SystemCommand,
};
use crate::runtime::admin::AdminConsole;
use crate::runtime::broadcast::{broadcast, send_to, DeliveryReport, Message};
use crate::runtime::buffer::FlushStatus;
use crate::runtime::connection::{ConnId, Connection, ConnectionLimits, ConnectionRegistry};
use bytes::Bytes;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const ADMIN_TOKEN: Token = Token(usize::MAX - 1);
const WAKER_TOKEN: Token = Token(usize::MAX - 2);

const EVENTS_CAPACITY: usize = 1024;

/// Socket reads one client gets per turn before others are served.
const READS_PER_TURN: usize = 16;

/// Upper bound on how long a shutdown request can go unnoticed when a
/// signal lands just before the loop blocks.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Requests an orderly stop of a running server from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the loop to stop and wake it up.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            debug!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// The chat server: listener, operator console and client registry, driven
/// by one poll loop.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    limits: ConnectionLimits,
    admin: Option<AdminConsole>,
    read_buf: Vec<u8>,
    /// Byte cap on a single read pass over one client.
    read_budget: usize,
    /// Clients whose last read pass hit the budget with data left behind.
    unread: Vec<ConnId>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind the listening socket and set up the poller.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let poll = Poll::new()?;
        let listener = create_listener(addr, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let read_size = config.read_buffer_size.max(1);

        Ok(Self {
            poll,
            listener,
            local_addr,
            registry: ConnectionRegistry::new(config.max_connections),
            limits: ConnectionLimits {
                outbound_limit: config.outbound_limit,
                max_line_length: config.max_line_length,
            },
            admin: None,
            read_buf: vec![0u8; read_size],
            read_budget: read_size * READS_PER_TURN,
            unread: Vec::new(),
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                waker,
            },
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of connected clients.
    pub fn online(&self) -> usize {
        self.registry.count()
    }

    /// Watch `console` for operator announcements.
    pub fn attach_admin(&mut self, console: AdminConsole) -> io::Result<()> {
        console.register(self.poll.registry(), ADMIN_TOKEN)?;
        self.detach_admin();
        self.admin = Some(console);
        Ok(())
    }

    /// Serve until shutdown is requested or a fatal error occurs.
    ///
    /// Every client socket is closed before this returns, on both paths.
    pub fn run(&mut self) -> Result<()> {
        let result = self.serve();
        if let Err(ref e) = result {
            error!(error = %e, "Event loop failed");
        }
        self.close_all();
        result
    }

    fn serve(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        info!(
            addr = %self.local_addr,
            max_connections = self.registry.capacity(),
            admin_console = self.admin.is_some(),
            "Waiting for connections"
        );

        loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested");
                return Ok(());
            }

            // Don't sleep while a client still has bytes we left unread
            let timeout = if self.unread.is_empty() {
                SHUTDOWN_CHECK_INTERVAL
            } else {
                Duration::ZERO
            };

            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    ADMIN_TOKEN => self.handle_admin_input(),
                    WAKER_TOKEN => {}
                    Token(conn_id) => self.handle_connection_event(ConnId(conn_id), event),
                }
            }

            self.resume_reads();
        }
    }

    /// Give every client cut off by the read budget another turn.
    fn resume_reads(&mut self) {
        for id in std::mem::take(&mut self.unread) {
            if self.registry.contains(id) {
                self.handle_readable(id);
            }
        }
    }

    /// Drain the accept queue; the poller only reports the edge.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // e.g. EMFILE: the pending connection stays queued and
                    // the listener stays open for later capacity
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let conn = Connection::new(stream, peer, self.limits);
        let id = match self.registry.register(conn) {
            Ok(id) => id,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Rejecting connection");
                return;
            }
        };

        let registered = match self.registry.get_mut(id) {
            Some(conn) => self.poll.registry().register(
                conn.stream_mut(),
                Token(id.0),
                Interest::READABLE,
            ),
            None => return,
        };
        if let Err(e) = registered {
            warn!(peer = %peer, error = %e, "Failed to watch connection");
            self.registry.deregister(id);
            return;
        }

        info!(
            conn_id = %id,
            peer = %peer,
            online = self.online(),
            "Client joined"
        );

        let label = self.local_addr.port();
        let report = send_to(&mut self.registry, id, format_welcome(label));
        self.settle(report);

        if self.registry.contains(id) {
            let report = broadcast(
                &mut self.registry,
                &Message::from_client(id, format_join(peer, label)),
            );
            self.settle(report);
        }
    }

    fn handle_connection_event(&mut self, id: ConnId, event: &Event) {
        if !self.registry.contains(id) {
            return;
        }

        if event.is_writable() {
            if let Err(e) = self.flush_connection(id) {
                debug!(conn_id = %id, error = %e, "Write error");
                self.disconnect(vec![id]);
                return;
            }
        }

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.handle_readable(id);
        }
    }

    fn flush_connection(&mut self, id: ConnId) -> io::Result<()> {
        let status = match self.registry.get_mut(id) {
            Some(conn) => conn.flush()?,
            None => return Ok(()),
        };
        if status == FlushStatus::Drained {
            self.set_write_interest(id, false)?;
        }
        Ok(())
    }

    fn handle_readable(&mut self, id: ConnId) {
        let (lines, outcome) = {
            let Some(conn) = self.registry.get_mut(id) else {
                return;
            };
            match conn.read_available(&mut self.read_buf, self.read_budget) {
                Ok(outcome) => {
                    let inbound = conn.inbound_mut();
                    let mut lines = inbound.drain_lines();
                    trace!(
                        conn_id = %id,
                        bytes = outcome.bytes,
                        lines = lines.len(),
                        buffered = inbound.len(),
                        "Read from client"
                    );
                    if outcome.eof {
                        lines.extend(inbound.take_remainder());
                    }
                    (lines, outcome)
                }
                Err(e) => {
                    debug!(conn_id = %id, error = %e, "Read error");
                    self.disconnect(vec![id]);
                    return;
                }
            }
        };

        for line in lines {
            if !self.registry.contains(id) {
                return;
            }
            self.handle_line(id, line);
        }

        if outcome.eof {
            debug!(conn_id = %id, "Peer closed connection");
            self.disconnect(vec![id]);
        } else if outcome.more && self.registry.contains(id) && !self.unread.contains(&id) {
            self.unread.push(id);
        }
    }

    fn handle_line(&mut self, id: ConnId, line: Bytes) {
        match match_command(&line) {
            Some(SystemCommand::Count) => {
                let online = self.online();
                debug!(conn_id = %id, online, "Count requested");
                let report = send_to(&mut self.registry, id, format_count(online));
                self.settle(report);
            }
            Some(SystemCommand::Reserved(symbol)) => {
                debug!(conn_id = %id, symbol = %char::from(symbol), "Ignoring reserved command");
            }
            None => {
                let report = broadcast(&mut self.registry, &Message::from_client(id, line));
                trace!(conn_id = %id, reached = report.reached(), "Relayed line");
                self.settle(report);
            }
        }
    }

    fn handle_admin_input(&mut self) {
        let Some(admin) = self.admin.as_mut() else {
            return;
        };

        let read = match admin.read_lines() {
            Ok(read) => read,
            Err(e) => {
                warn!(error = %e, "Operator console failed, detaching");
                self.detach_admin();
                return;
            }
        };

        for line in read.lines {
            let text = line_text(&line).trim_ascii();
            if text.is_empty() {
                continue;
            }
            info!(text = %String::from_utf8_lossy(text), "Operator announcement");
            let report = broadcast(&mut self.registry, &Message::from_server(format_operator(text)));
            self.settle(report);
        }

        if read.eof {
            info!("Operator console closed");
            self.detach_admin();
        }
    }

    fn detach_admin(&mut self) {
        if let Some(admin) = self.admin.take() {
            let _ = admin.deregister(self.poll.registry());
        }
    }

    /// Apply a delivery report: request write readiness for recipients
    /// with queued bytes, then disconnect the ones that failed.
    fn settle(&mut self, report: DeliveryReport) {
        let failed = self.absorb(report);
        if !failed.is_empty() {
            self.disconnect(failed);
        }
    }

    fn absorb(&mut self, report: DeliveryReport) -> Vec<ConnId> {
        let mut failed = report.failed;
        for id in report.queued {
            if let Err(e) = self.set_write_interest(id, true) {
                debug!(conn_id = %id, error = %e, "Failed to request write readiness");
                failed.push(id);
            }
        }
        failed
    }

    fn set_write_interest(&mut self, id: ConnId, on: bool) -> io::Result<()> {
        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(());
        };
        if conn.write_interest() == on {
            return Ok(());
        }

        let interest = if on {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.poll
            .registry()
            .reregister(conn.stream_mut(), Token(id.0), interest)?;
        conn.set_write_interest(on);
        Ok(())
    }

    /// Remove connections and announce each departure to those remaining.
    ///
    /// Announcing can expose further dead recipients; they are removed in
    /// turn until a pass completes cleanly.
    fn disconnect(&mut self, mut doomed: Vec<ConnId>) {
        while let Some(id) = doomed.pop() {
            let Some(mut conn) = self.registry.deregister(id) else {
                continue;
            };
            let _ = self.poll.registry().deregister(conn.stream_mut());
            let peer = conn.peer();
            drop(conn);

            info!(
                conn_id = %id,
                peer = %peer,
                online = self.online(),
                "Client left"
            );

            let report = broadcast(&mut self.registry, &Message::from_server(format_leave(peer)));
            doomed.extend(self.absorb(report));
        }
    }

    /// Close every client socket, flushing what can go out without waiting.
    fn close_all(&mut self) {
        let mut closed = 0;
        for mut conn in self.registry.drain() {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            if conn.has_pending_output() {
                let _ = conn.flush();
            }
            closed += 1;
        }
        self.unread.clear();
        let _ = self.poll.registry().deregister(&mut self.listener);
        self.detach_admin();

        info!(closed, "Closed all connections");
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
