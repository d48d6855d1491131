//! Fan-out of one message to every other registered connection.
//!
//! A delivery pass never removes anything from the registry. Recipients
//! whose write fails are marked dead and listed in the report; the
//! dispatcher deregisters them once the pass is over and announces their
//! departure with a pass of its own.

use crate::runtime::buffer::FlushStatus;
use crate::runtime::connection::{ConnId, ConnectionRegistry};
use bytes::Bytes;
use std::io::Write;
use tracing::debug;

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A registered client; it is left out of the delivery.
    Client(ConnId),
    /// The server itself or the operator console.
    Server,
}

/// One logical line on its way to recipients.
#[derive(Debug, Clone)]
pub struct Message {
    pub origin: Origin,
    pub payload: Bytes,
}

impl Message {
    pub fn new(origin: Origin, payload: Bytes) -> Self {
        Self { origin, payload }
    }

    pub fn from_client(id: ConnId, payload: Bytes) -> Self {
        Self::new(Origin::Client(id), payload)
    }

    pub fn from_server(payload: Bytes) -> Self {
        Self::new(Origin::Server, payload)
    }
}

/// Outcome of one delivery pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients whose socket took the whole payload.
    pub delivered: Vec<ConnId>,
    /// Recipients with bytes still queued; they need write readiness.
    pub queued: Vec<ConnId>,
    /// Recipients that failed and must be disconnected.
    pub failed: Vec<ConnId>,
}

impl DeliveryReport {
    /// Recipients that got (or will get) the payload.
    pub fn reached(&self) -> usize {
        self.delivered.len() + self.queued.len()
    }

    fn record<E: std::fmt::Display>(
        &mut self,
        id: ConnId,
        outcome: Result<FlushStatus, E>,
    ) -> bool {
        match outcome {
            Ok(FlushStatus::Drained) => self.delivered.push(id),
            Ok(FlushStatus::Pending) => self.queued.push(id),
            Err(e) => {
                debug!(conn_id = %id, error = %e, "Delivery failed");
                self.failed.push(id);
                return false;
            }
        }
        true
    }
}

/// Deliver `message` to every live connection except its origin.
pub fn broadcast<S: Write>(
    registry: &mut ConnectionRegistry<S>,
    message: &Message,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for id in registry.all() {
        if message.origin == Origin::Client(id) {
            continue;
        }
        deliver(registry, id, &message.payload, &mut report);
    }

    report
}

/// Deliver `payload` to a single connection (command replies, welcome).
pub fn send_to<S: Write>(
    registry: &mut ConnectionRegistry<S>,
    id: ConnId,
    payload: Bytes,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    deliver(registry, id, &payload, &mut report);
    report
}

fn deliver<S: Write>(
    registry: &mut ConnectionRegistry<S>,
    id: ConnId,
    payload: &Bytes,
    report: &mut DeliveryReport,
) {
    let Some(conn) = registry.get_mut(id) else {
        return;
    };
    if !conn.is_alive() {
        return;
    }

    let outcome = conn.send(payload.clone());
    if !report.record(id, outcome) {
        conn.mark_dead();
    }
}
