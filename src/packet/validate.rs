//! Structural packet checks run before dispatch.
//!
//! These are the fatal validations: a failure here terminates the
//! connection. Authorization and QoS capping happen later, per operation.

use super::Packet;
use crate::error::ProtocolError;
use crate::topic;

/// Validate a packet's topic structure.
///
/// PUBLISH topics must be names (no wildcards); SUBSCRIBE and UNSUBSCRIBE
/// lists must be non-empty and carry only well-formed filters. Every other
/// packet passes.
pub fn validate(packet: &Packet) -> Result<(), ProtocolError> {
    match packet {
        Packet::Publish(publish) => {
            if topic::valid_name(&publish.topic) {
                Ok(())
            } else {
                Err(ProtocolError::BadTopic)
            }
        }
        Packet::Subscribe(subscribe) => {
            if subscribe.topics.is_empty() {
                return Err(ProtocolError::EmptyTopics);
            }
            for (filter, _) in &subscribe.topics {
                if !topic::valid_filter(filter) {
                    return Err(ProtocolError::BadTopic);
                }
            }
            Ok(())
        }
        Packet::Unsubscribe(unsubscribe) => {
            if unsubscribe.topics.is_empty() {
                return Err(ProtocolError::EmptyTopics);
            }
            for filter in &unsubscribe.topics {
                if !topic::valid_filter(filter) {
                    return Err(ProtocolError::BadTopic);
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Publish, Qos, Subscribe, Unsubscribe};
    use bytes::Bytes;

    fn publish(topic: &str) -> Packet {
        Packet::Publish(Publish {
            topic: topic.into(),
            payload: Bytes::new(),
            qos: Qos::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        })
    }

    #[test]
    fn publish_topic_must_be_a_name() {
        assert!(validate(&publish("sensors/temp")).is_ok());
        assert_eq!(validate(&publish("sensors/+/temp")), Err(ProtocolError::BadTopic));
        assert_eq!(validate(&publish("")), Err(ProtocolError::BadTopic));
    }

    #[test]
    fn subscribe_needs_topics() {
        let empty = Packet::Subscribe(Subscribe {
            packet_id: 1,
            topics: vec![],
        });
        assert_eq!(validate(&empty), Err(ProtocolError::EmptyTopics));

        let bad = Packet::Subscribe(Subscribe {
            packet_id: 1,
            topics: vec![("ok/+".into(), Qos::AtMostOnce), ("bad/#/x".into(), Qos::AtLeastOnce)],
        });
        assert_eq!(validate(&bad), Err(ProtocolError::BadTopic));

        let good = Packet::Subscribe(Subscribe {
            packet_id: 1,
            topics: vec![("a/#".into(), Qos::ExactlyOnce)],
        });
        assert!(validate(&good).is_ok());
    }

    #[test]
    fn unsubscribe_needs_topics() {
        let empty = Packet::Unsubscribe(Unsubscribe {
            packet_id: 2,
            topics: vec![],
        });
        assert_eq!(validate(&empty), Err(ProtocolError::EmptyTopics));

        let good = Packet::Unsubscribe(Unsubscribe {
            packet_id: 2,
            topics: vec!["a/b".into()],
        });
        assert!(validate(&good).is_ok());
    }

    #[test]
    fn control_packets_pass() {
        assert!(validate(&Packet::Pingreq).is_ok());
        assert!(validate(&Packet::Disconnect).is_ok());
        assert!(validate(&Packet::Puback { packet_id: 1 }).is_ok());
    }
}
