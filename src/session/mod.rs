//! Per-connection protocol state machine.
//!
//! One `Session` exists per connected client and owns everything about that
//! client: CONNECT gating, subscriptions, QoS 1 inflight state, the will,
//! keepalive arithmetic, and the per-session ACL cache. All mutation happens
//! from the single task draining the session mailbox (`actor::run_session`).
//!
//! - `actor` - Mailbox events, handles, and the run loop
//! - `delivery` - QoS tuning, inflight tracking, retransmission
//! - `keepalive` - Keepalive window supervision state
//! - `acl` - Per-session publish ACL memoization

pub mod acl;
pub mod actor;
pub mod delivery;
pub mod keepalive;

pub use actor::{
    run_session, session_channel, ChannelSink, PacketSink, SessionEvent, SessionHandle,
    TimeoutEvent,
};
pub use keepalive::Keepalive;

use crate::broker::{ClientInfo, Collaborators, SubscribeOptions};
use crate::core::config::ProtocolConfig;
use crate::core::time::{Clock, SystemClock};
use crate::error::{ProtocolError, ShutdownReason};
use crate::ops::metrics::PacketMetrics;
use crate::packet::{
    self, validate, Connect, ConnackCode, LastWill, Message, Packet, Qos, Subscribe, Unsubscribe,
    MQTT_3_1_1, SUBACK_FAILURE,
};
use acl::AclCache;
use delivery::RetryTimer;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Protocol state for one client connection.
///
/// Lifecycle: `AwaitingConnect` (created on transport accept) becomes
/// `Connected` once a CONNECT is accepted with `CONNACK(Accepted)`, and
/// `Terminated` on DISCONNECT, protocol error, transport loss, or takeover.
/// The two flags below encode those three states.
pub struct Session<C: Clock = SystemClock> {
    peer_addr: SocketAddr,
    sink: Box<dyn PacketSink>,
    mailbox: SessionHandle,
    config: ProtocolConfig,
    collab: Collaborators,
    metrics: Arc<PacketMetrics>,
    clock: C,

    connected: bool,
    terminated: bool,

    client_id: String,
    clean_session: bool,
    proto_ver: u8,
    proto_name: String,
    username: Option<String>,
    will: Option<LastWill>,
    keepalive: Keepalive,
    connected_at: Option<SystemTime>,

    /// Next QoS 1 packet id; see `alloc_packet_id` for wraparound.
    next_packet_id: u16,
    /// filter -> granted QoS (already capped at 1).
    subscriptions: HashMap<String, Qos>,
    /// Sent-but-unacked QoS 1 messages, in send order.
    inflight: VecDeque<(u16, Message)>,
    /// packet id -> armed retransmit timer; keys always mirror `inflight`.
    awaiting_ack: HashMap<u16, RetryTimer>,
    acl_cache: AclCache,
}

impl<C: Clock> Session<C> {
    pub fn new(
        peer_addr: SocketAddr,
        sink: Box<dyn PacketSink>,
        mailbox: SessionHandle,
        config: ProtocolConfig,
        collab: Collaborators,
        metrics: Arc<PacketMetrics>,
        clock: C,
    ) -> Self {
        let keepalive = Keepalive::disarmed(clock.now());
        let acl_cache = AclCache::new(config.cache_acl);
        Self {
            peer_addr,
            sink,
            mailbox,
            config,
            collab,
            metrics,
            clock,
            connected: false,
            terminated: false,
            client_id: String::new(),
            clean_session: false,
            proto_ver: 0,
            proto_name: String::new(),
            username: None,
            will: None,
            keepalive,
            connected_at: None,
            next_packet_id: 1,
            subscriptions: HashMap::new(),
            inflight: VecDeque::new(),
            awaiting_ack: HashMap::new(),
            acl_cache,
        }
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    /// Process one parsed inbound packet.
    ///
    /// An `Err` is fatal: the caller terminates the session and closes the
    /// transport.
    pub fn receive(&mut self, packet: Packet) -> Result<(), ProtocolError> {
        if self.terminated {
            tracing::debug!(peer = %self.peer_addr, "packet after termination dropped");
            return Ok(());
        }
        tracing::info!(peer = %self.peer_addr, "RECV {}", packet);
        self.metrics.record_received(&packet);
        self.keepalive.touch(self.clock.now());

        if !self.connected {
            return match packet {
                Packet::Connect(connect) => self.handle_connect(connect),
                _ => Err(ProtocolError::NotConnected),
            };
        }

        validate::validate(&packet)?;
        match packet {
            Packet::Connect(_) => Err(ProtocolError::BadConnect),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::Puback { packet_id } => {
                self.handle_puback(packet_id);
                Ok(())
            }
            Packet::Subscribe(subscribe) => {
                self.handle_subscribe(subscribe);
                Ok(())
            }
            Packet::Unsubscribe(unsubscribe) => {
                self.handle_unsubscribe(unsubscribe);
                Ok(())
            }
            Packet::Pingreq => {
                self.send_packet(Packet::Pingresp);
                Ok(())
            }
            Packet::Disconnect => {
                // Clean close: the will is discarded before termination.
                self.will = None;
                self.shutdown(ShutdownReason::Normal);
                Ok(())
            }
            other => {
                tracing::warn!(peer = %self.peer_addr, "unexpected inbound {}; ignored", other);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // CONNECT
    // -----------------------------------------------------------------------

    fn handle_connect(&mut self, connect: Connect) -> Result<(), ProtocolError> {
        self.proto_ver = connect.proto_ver;
        self.proto_name = connect.proto_name.clone();
        self.clean_session = connect.clean_session;
        self.username = connect.username.clone();
        self.will = connect.will.clone();

        if !packet::supported_protocol(connect.proto_ver, &connect.proto_name) {
            self.reject_connect(ConnackCode::UnacceptableProtocolVersion);
            return Ok(());
        }

        let id_len = connect.client_id.len();
        let acceptable_id = if (1..=self.config.max_clientid_len).contains(&id_len) {
            true
        } else if id_len == 0 && !connect.clean_session {
            false
        } else {
            // Empty id: only MQTT 3.1.1 clients get a generated one.
            id_len == 0 && connect.proto_ver == MQTT_3_1_1
        };
        if !acceptable_id {
            self.reject_connect(ConnackCode::IdentifierRejected);
            return Ok(());
        }

        let candidate = ClientInfo {
            client_id: connect.client_id.clone(),
            username: connect.username.clone(),
            peer_addr: self.peer_addr,
        };
        if let Err(denied) = self
            .collab
            .auth
            .authenticate(&candidate, connect.password.as_deref())
        {
            tracing::warn!(
                peer = %self.peer_addr,
                client_id = %connect.client_id,
                error = %denied,
                "authentication failed"
            );
            self.reject_connect(ConnackCode::BadCredentials);
            return Ok(());
        }

        self.client_id = if connect.client_id.is_empty() {
            self.collab.client_ids.generate()
        } else {
            connect.client_id
        };
        self.connected = true;
        self.connected_at = Some(SystemTime::now());

        // Fire-and-forget: a conflicting prior holder gets its shutdown
        // through its own mailbox, never through this call.
        let client = self.client_info();
        self.collab.registry.register(&client);

        self.keepalive.arm(connect.keepalive_secs, self.clock.now());
        self.collab.hooks.client_connected(&client, ConnackCode::Accepted);

        // Durable session resumption is not implemented, so the session
        // present flag is always false.
        self.send_packet(Packet::Connack {
            session_present: false,
            code: ConnackCode::Accepted,
        });
        Ok(())
    }

    /// Reply a rejecting CONNACK without transitioning to connected; the
    /// transport closes after flushing it.
    fn reject_connect(&mut self, code: ConnackCode) {
        self.send_packet(Packet::Connack {
            session_present: false,
            code,
        });
    }

    // -----------------------------------------------------------------------
    // SUBSCRIBE / UNSUBSCRIBE
    // -----------------------------------------------------------------------

    fn handle_subscribe(&mut self, subscribe: Subscribe) {
        let client = self.client_info();

        // Subscribe ACL is re-checked every time, never cached. Denial is
        // all-or-nothing: one refused filter fails the whole batch.
        let mut denied = false;
        for (filter, _) in &subscribe.topics {
            if self.collab.acl.check(&client, crate::broker::AclAction::Subscribe, filter)
                == crate::broker::Access::Deny
            {
                tracing::warn!(
                    peer = %self.peer_addr,
                    client_id = %self.client_id,
                    filter = %filter,
                    "subscribe denied by ACL"
                );
                self.metrics.acl_denials.inc();
                denied = true;
            }
        }
        if denied {
            let granted = vec![SUBACK_FAILURE; subscribe.topics.len()];
            self.send_packet(Packet::Suback {
                packet_id: subscribe.packet_id,
                granted,
            });
            return;
        }

        let table = self.collab.hooks.client_subscribe(&client, subscribe.topics);
        let mut granted = Vec::with_capacity(table.len());
        for (filter, requested) in table {
            let qos = requested.degrade();
            match self.subscriptions.get(&filter).copied() {
                None => {
                    self.collab
                        .router
                        .subscribe(&filter, &self.client_id, SubscribeOptions { qos });
                    self.collab.hooks.client_subscribed(&client, &filter, qos);
                    self.subscriptions.insert(filter, qos);
                }
                Some(existing) if existing == qos => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        filter = %filter,
                        "duplicate subscription ignored"
                    );
                }
                Some(_) => {
                    self.collab.router.set_qos(&filter, &self.client_id, qos);
                    self.subscriptions.insert(filter, qos);
                }
            }
            granted.push(qos.as_u8());
        }
        self.send_packet(Packet::Suback {
            packet_id: subscribe.packet_id,
            granted,
        });
    }

    fn handle_unsubscribe(&mut self, unsubscribe: Unsubscribe) {
        let client = self.client_info();
        let topics = self.collab.hooks.client_unsubscribe(&client, unsubscribe.topics);
        for filter in topics {
            if self.subscriptions.remove(&filter).is_some() {
                self.collab.router.unsubscribe(&filter, &self.client_id);
            } else {
                tracing::debug!(
                    peer = %self.peer_addr,
                    filter = %filter,
                    "unsubscribe for unknown filter ignored"
                );
            }
        }
        self.send_packet(Packet::Unsuback {
            packet_id: unsubscribe.packet_id,
        });
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Terminate the session.
    ///
    /// The will is published unless the close was clean (DISCONNECT already
    /// discarded it), the reason is `Conflict` (the replacement session owns
    /// will semantics), or no client id was ever assigned. The prior
    /// registry entry is never removed on `Conflict`: the replacement
    /// already holds it.
    pub fn shutdown(&mut self, reason: ShutdownReason) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.connected = false;
        for (_, timer) in self.awaiting_ack.drain() {
            timer.cancel();
        }
        self.inflight.clear();
        tracing::debug!(peer = %self.peer_addr, reason = %reason, "session shutdown");

        if self.client_id.is_empty() {
            return;
        }
        if reason != ShutdownReason::Conflict {
            if let Some(will) = self.will.take() {
                let message = Message {
                    topic: will.topic,
                    payload: will.payload,
                    qos: will.qos,
                    retain: will.retain,
                    dup: false,
                    from: Some(crate::packet::Origin {
                        client_id: self.client_id.clone(),
                        username: self.username.clone(),
                    }),
                };
                tracing::debug!(
                    peer = %self.peer_addr,
                    client_id = %self.client_id,
                    topic = %message.topic,
                    "publishing will"
                );
                self.collab.router.publish(message);
            }
        }
        let client = self.client_info();
        self.collab.hooks.client_disconnected(&client, reason);
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    pub(crate) fn send_packet(&mut self, packet: Packet) {
        tracing::info!(peer = %self.peer_addr, "SEND {}", packet);
        self.metrics.record_sent(&packet);
        self.sink.send(packet);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            peer_addr: self.peer_addr,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn metrics(&self) -> &PacketMetrics {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Protocol identity from CONNECT: `(level, name)`.
    pub fn protocol(&self) -> (u8, &str) {
        (self.proto_ver, &self.proto_name)
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn connected_at(&self) -> Option<SystemTime> {
        self.connected_at
    }

    /// Granted QoS for a filter this session subscribed to.
    pub fn granted_qos(&self, filter: &str) -> Option<Qos> {
        self.subscriptions.get(filter).copied()
    }

    /// Packet ids currently inflight, in send order.
    pub fn inflight_packet_ids(&self) -> Vec<u16> {
        self.inflight.iter().map(|(id, _)| *id).collect()
    }

    /// Packet ids with an armed retransmit timer, sorted.
    pub fn awaiting_ack_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.awaiting_ack.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The armed keepalive check window (1.25x the advertised interval).
    pub fn keepalive_window(&self) -> Option<Duration> {
        self.keepalive.window()
    }

    /// Whether the client has gone quiet past its keepalive window.
    pub fn keepalive_expired(&self, now: Instant) -> bool {
        self.keepalive.expired(now)
    }

    /// Opaque websocket upgrade headers carried for this connection.
    pub fn ws_initial_headers(&self) -> &[(String, String)] {
        &self.config.ws_initial_headers
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
