//! MQTT 3.1/3.1.1 control packets at the packet-semantics level.
//!
//! Byte-level framing lives in the transport; the session exchanges these
//! already-parsed values. Every packet renders through `Display` so the
//! per-packet log lines stay readable.

pub mod validate;

use bytes::Bytes;
use std::fmt;

/// Protocol level byte for MQTT 3.1 (protocol name "MQIsdp").
pub const MQTT_3_1: u8 = 3;
/// Protocol level byte for MQTT 3.1.1 (protocol name "MQTT").
pub const MQTT_3_1_1: u8 = 4;

/// SUBACK return code for a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Accepted `(protocol_level, protocol_name)` pairs.
pub fn supported_protocol(level: u8, name: &str) -> bool {
    matches!((level, name), (MQTT_3_1, "MQIsdp") | (MQTT_3_1_1, "MQTT"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    /// Cap at QoS 1; exactly-once is degraded on admission and on delivery.
    pub fn degrade(self) -> Qos {
        if self == Qos::ExactlyOnce {
            Qos::AtLeastOnce
        } else {
            self
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// CONNACK return codes issued by this engine.
///
/// The wire values are MQTT 3.1.1 table 3.1; only the codes a session can
/// actually reply with are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnackCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    BadCredentials = 4,
}

impl ConnackCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The message a client asks the broker to publish on its behalf when the
/// session terminates abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// Identity a message was published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub client_id: String,
    pub username: Option<String>,
}

/// An application message as routed between sessions and the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    pub from: Option<Origin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub proto_ver: u8,
    pub proto_name: String,
    pub client_id: String,
    pub clean_session: bool,
    pub keepalive_secs: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<LastWill>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    /// Present for QoS > 0.
    pub packet_id: Option<u16>,
}

impl Publish {
    /// Build the outbound PUBLISH for a routed message.
    pub fn from_message(message: &Message, packet_id: Option<u16>) -> Self {
        Self {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            qos: message.qos,
            retain: message.retain,
            dup: message.dup,
            packet_id,
        }
    }

    /// Turn an inbound PUBLISH into a routable message stamped with its origin.
    pub fn into_message(self, from: Origin) -> Message {
        Message {
            topic: self.topic,
            payload: self.payload,
            qos: self.qos,
            retain: self.retain,
            dup: self.dup,
            from: Some(from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// Requested `(filter, qos)` pairs in request order.
    pub topics: Vec<(String, Qos)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// Control packets exchanged with one client.
///
/// Only the server side of MQTT 3.1/3.1.1 without QoS 2: PUBREC/PUBREL/
/// PUBCOMP have no representation here and a QoS 2 PUBLISH fails the
/// session during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack { session_present: bool, code: ConnackCode },
    Publish(Publish),
    Puback { packet_id: u16 },
    Subscribe(Subscribe),
    Suback { packet_id: u16, granted: Vec<u8> },
    Unsubscribe(Unsubscribe),
    Unsuback { packet_id: u16 },
    Pingreq,
    Pingresp,
    Disconnect,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Connect(c) => write!(
                f,
                "CONNECT(client_id={}, proto={}/{}, clean={}, keepalive={}s, username={}, will={})",
                c.client_id,
                c.proto_name,
                c.proto_ver,
                c.clean_session,
                c.keepalive_secs,
                c.username.as_deref().unwrap_or("-"),
                c.will.as_ref().map_or("-".to_string(), |w| w.topic.clone()),
            ),
            Packet::Connack { session_present, code } => {
                write!(f, "CONNACK(code={}, sp={})", code.as_u8(), session_present)
            }
            Packet::Publish(p) => write!(
                f,
                "PUBLISH(topic={}, qos={}, retain={}, dup={}, pid={})",
                p.topic,
                p.qos,
                p.retain,
                p.dup,
                p.packet_id.map_or("-".to_string(), |id| id.to_string()),
            ),
            Packet::Puback { packet_id } => write!(f, "PUBACK(pid={packet_id})"),
            Packet::Subscribe(s) => {
                write!(f, "SUBSCRIBE(pid={}, topics=[", s.packet_id)?;
                for (idx, (filter, qos)) in s.topics.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{filter}@{qos}")?;
                }
                f.write_str("])")
            }
            Packet::Suback { packet_id, granted } => {
                write!(f, "SUBACK(pid={packet_id}, granted={granted:?})")
            }
            Packet::Unsubscribe(u) => {
                write!(f, "UNSUBSCRIBE(pid={}, topics={:?})", u.packet_id, u.topics)
            }
            Packet::Unsuback { packet_id } => write!(f, "UNSUBACK(pid={packet_id})"),
            Packet::Pingreq => f.write_str("PINGREQ"),
            Packet::Pingresp => f.write_str("PINGRESP"),
            Packet::Disconnect => f.write_str("DISCONNECT"),
        }
    }
}
