#![deny(clippy::all)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]

//! Photon - per-connection MQTT 3.1/3.1.1 protocol engine.
//!
//! One `Session` per connected client, driven as a single-task actor: the
//! transport, the topic router, and the client registry all talk to it
//! through one mailbox, and the session talks back through a unary packet
//! sink and a set of collaborator traits. QoS 0 and 1 only; exactly-once
//! is deliberately unimplemented and fails the session.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Per-connection protocol options
//! - `core::time` - Deterministic time utilities
//!
//! ## Protocol
//! - `packet` - Control packet model and structural validation
//! - `topic` - Topic name/filter rules and wildcard matching
//!
//! ## Session
//! - `session` - The connection state machine and its mailbox
//! - `session::delivery` - QoS tuning, inflight queue, retransmission
//! - `session::keepalive` - Keepalive window supervision state
//! - `session::acl` - Per-session publish ACL memoization
//!
//! ## Host integration
//! - `broker` - Contracts consumed from the surrounding broker
//! - `ops::metrics` - Per-packet-type counters
//! - `error` - The closed set of protocol violations

// Core infrastructure
pub mod core;

// Protocol model
pub mod packet;
pub mod topic;

// Session engine
pub mod session;

// Host integration
pub mod broker;
pub mod error;
pub mod ops;

// Re-exports for convenience
pub use self::core::{config, time};
pub use broker::{
    Access, AclAction, AclProvider, AuthProvider, ClientInfo, Collaborators, Hooks, Registry,
    Router,
};
pub use config::ProtocolConfig;
pub use error::{ProtocolError, ShutdownReason};
pub use ops::metrics::PacketMetrics;
pub use packet::{ConnackCode, LastWill, Message, Packet, Qos};
pub use session::{
    run_session, session_channel, ChannelSink, PacketSink, Session, SessionEvent, SessionHandle,
    TimeoutEvent,
};
