//! The session mailbox: one queue, one consumer.
//!
//! Everything that can happen to a session — an inbound packet, a retry
//! timer firing, a delivery pushed by the router, a shutdown request —
//! arrives as a `SessionEvent` and is processed one at a time by
//! `run_session`. That serialization is the whole concurrency contract:
//! session state is mutated from exactly one task and needs no locks.

use super::Session;
use crate::core::time::Clock;
use crate::error::{ProtocolError, ShutdownReason};
use crate::packet::{Message, Packet};
use tokio::sync::mpsc;

/// One unit of work for a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A parsed inbound packet from the transport.
    Packet(Packet),
    /// A timer owned by the session fired.
    Timeout(TimeoutEvent),
    /// The router matched one of this session's subscriptions.
    Deliver { topic: String, message: Message },
    /// Terminate; injected by the transport, the registry, or the host.
    Shutdown(ShutdownReason),
}

/// Timer events owned by the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// The retransmit interval elapsed without a PUBACK for this id.
    AwaitingAck { packet_id: u16 },
}

/// Cloneable sender half of a session mailbox.
///
/// Handed to the transport (packets), the router (deliveries), the registry
/// (conflict shutdowns), and kept by the session itself for timer wakeups.
/// Sends to a dead session are silently dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn packet(&self, packet: Packet) {
        let _ = self.tx.send(SessionEvent::Packet(packet));
    }

    pub fn deliver(&self, topic: impl Into<String>, message: Message) {
        let _ = self.tx.send(SessionEvent::Deliver {
            topic: topic.into(),
            message,
        });
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.tx.send(SessionEvent::Shutdown(reason));
    }

    pub(crate) fn timeout(&self, event: TimeoutEvent) {
        let _ = self.tx.send(SessionEvent::Timeout(event));
    }
}

/// Create a fresh mailbox pair for one session.
pub fn session_channel() -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SessionHandle { tx }, rx)
}

/// Unary sink for outbound packets.
///
/// Infallible from the session's view: buffering, backpressure, and framing
/// are the transport's concern.
pub trait PacketSink: Send {
    fn send(&mut self, packet: Packet);
}

/// Channel-backed sink; the transport (or a test) drains the receiver.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Packet>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PacketSink for ChannelSink {
    fn send(&mut self, packet: Packet) {
        let _ = self.tx.send(packet);
    }
}

/// Drive one session until it terminates.
///
/// Protocol violations terminate the session (the will is still emitted,
/// the reason not being `Conflict`) and surface the error so the transport
/// can close the connection. A closed mailbox with no prior DISCONNECT is
/// treated as a socket-level loss.
pub async fn run_session<C: Clock>(
    mut session: Session<C>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<(), ProtocolError> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Packet(packet) => {
                if let Err(err) = session.receive(packet) {
                    tracing::warn!(
                        peer = %session.peer_addr(),
                        error = %err,
                        "protocol violation; terminating session"
                    );
                    session.metrics().protocol_errors.inc();
                    session.shutdown(ShutdownReason::ProtocolViolation);
                    return Err(err);
                }
            }
            SessionEvent::Timeout(timeout) => session.timeout(timeout),
            SessionEvent::Deliver { topic, message } => session.deliver(&topic, message),
            SessionEvent::Shutdown(reason) => session.shutdown(reason),
        }
        if session.is_terminated() {
            return Ok(());
        }
    }
    session.shutdown(ShutdownReason::SocketError);
    Ok(())
}
