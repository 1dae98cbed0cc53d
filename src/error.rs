use std::fmt;
use thiserror::Error;

/// Protocol violations surfaced to the transport adapter.
///
/// Every variant is fatal for the connection: the adapter replies nothing
/// further and closes the socket. Benign inconsistencies (stale retry
/// timers, acks for unknown packet ids) are handled in place and never
/// reach this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A second CONNECT arrived on an already connected session.
    #[error("CONNECT received on an already connected session")]
    BadConnect,
    /// Any packet other than CONNECT arrived before the session was accepted.
    #[error("packet received before CONNECT was accepted")]
    NotConnected,
    /// A topic name or filter failed structural validation.
    #[error("malformed topic name or filter")]
    BadTopic,
    /// SUBSCRIBE or UNSUBSCRIBE carried an empty topic list.
    #[error("empty topic list in SUBSCRIBE/UNSUBSCRIBE")]
    EmptyTopics,
    /// QoS 2 PUBLISH; exactly-once delivery is not implemented.
    #[error("QoS 2 is not supported")]
    QosNotSupported,
}

/// Why a session is being torn down.
///
/// `Conflict` is special-cased throughout: the replacement session owns the
/// will semantics, so no will is published and the registry entry is left
/// to the new holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Clean DISCONNECT from the client.
    Normal,
    /// Another session registered the same client id (takeover).
    Conflict,
    /// The transport dropped without a DISCONNECT.
    SocketError,
    /// No client activity within the keepalive window.
    KeepaliveTimeout,
    /// The session was failed by a `ProtocolError`.
    ProtocolViolation,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ShutdownReason::Normal => "normal",
            ShutdownReason::Conflict => "conflict",
            ShutdownReason::SocketError => "socket_error",
            ShutdownReason::KeepaliveTimeout => "keepalive_timeout",
            ShutdownReason::ProtocolViolation => "protocol_violation",
        };
        f.write_str(label)
    }
}
