//! Message delivery: QoS tuning, the inflight queue, and retransmission.
//!
//! QoS 1 egress is at-least-once: every message gets a fresh packet id, is
//! appended to the inflight queue in send order, and is re-sent with
//! `dup = true` (same packet id) every retry interval until a PUBACK clears
//! it. Retry timers are spawned tasks that post back into the session
//! mailbox, so retransmission never races packet handling.

use super::actor::TimeoutEvent;
use super::Session;
use crate::broker::{Access, AclAction};
use crate::core::time::Clock;
use crate::error::ProtocolError;
use crate::packet::{Message, Origin, Packet, Publish, Qos};

/// Handle on one armed retransmit timer.
///
/// Cancellation is best-effort: a fire that raced the abort finds its
/// packet id gone from the awaiting-ack map and is ignored.
#[derive(Debug)]
pub(crate) struct RetryTimer {
    handle: tokio::task::JoinHandle<()>,
}

impl RetryTimer {
    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}

impl<C: Clock> Session<C> {
    /// Route one inbound PUBLISH.
    ///
    /// QoS 2 deliberately fails the session: exactly-once is not
    /// implemented and a documented error beats a wedged protocol state.
    pub(crate) fn handle_publish(&mut self, publish: Publish) -> Result<(), ProtocolError> {
        match publish.qos {
            Qos::ExactlyOnce => Err(ProtocolError::QosNotSupported),
            Qos::AtMostOnce => {
                self.ingress_publish(publish);
                Ok(())
            }
            Qos::AtLeastOnce => {
                let packet_id = publish.packet_id;
                if self.ingress_publish(publish) {
                    match packet_id {
                        Some(pid) => self.send_packet(Packet::Puback { packet_id: pid }),
                        None => tracing::warn!(
                            peer = %self.peer_addr,
                            "QoS 1 publish without a packet id; ack skipped"
                        ),
                    }
                }
                Ok(())
            }
        }
    }

    /// ACL-gate and forward to the router. Returns whether it was accepted.
    ///
    /// A denial drops the message silently: MQTT has no negative publish
    /// acknowledgement at QoS <= 1.
    fn ingress_publish(&mut self, publish: Publish) -> bool {
        match self.check_publish_acl(&publish.topic) {
            Access::Deny => {
                tracing::warn!(
                    peer = %self.peer_addr,
                    client_id = %self.client_id,
                    topic = %publish.topic,
                    "publish denied by ACL, message dropped"
                );
                self.metrics.acl_denials.inc();
                false
            }
            Access::Allow => {
                let message = publish.into_message(Origin {
                    client_id: self.client_id.clone(),
                    username: self.username.clone(),
                });
                self.collab.router.publish(message);
                true
            }
        }
    }

    /// Publish ACL decision, memoized per topic for the session's lifetime.
    fn check_publish_acl(&mut self, topic: &str) -> Access {
        if let Some(access) = self.acl_cache.lookup(topic) {
            return access;
        }
        let client = self.client_info();
        let access = self.collab.acl.check(&client, AclAction::Publish, topic);
        self.acl_cache.store(topic, access);
        access
    }

    /// Clear one inflight message on PUBACK.
    pub(crate) fn handle_puback(&mut self, packet_id: u16) {
        let Some(timer) = self.awaiting_ack.remove(&packet_id) else {
            tracing::warn!(peer = %self.peer_addr, packet_id, "PUBACK for unknown packet id");
            return;
        };
        timer.cancel();
        match self.inflight.iter().position(|(id, _)| *id == packet_id) {
            Some(idx) => {
                if let Some((_, message)) = self.inflight.remove(idx) {
                    let client = self.client_info();
                    self.collab.hooks.message_acked(&client, &message);
                }
            }
            None => tracing::error!(
                peer = %self.peer_addr,
                packet_id,
                "acked packet id missing from inflight queue"
            ),
        }
    }

    /// Egress: push one routed message to the client.
    ///
    /// Effective QoS is `min(degrade(message_qos), subscription_qos)`; the
    /// subscription lookup falls back to the message QoS for topics the
    /// session is not subscribed to (the router should not produce those).
    pub fn deliver(&mut self, topic: &str, mut message: Message) {
        if self.terminated || !self.connected {
            tracing::debug!(peer = %self.peer_addr, topic, "delivery to inactive session dropped");
            return;
        }
        let sub_qos = self.subscriptions.get(topic).copied().unwrap_or(message.qos);
        message.qos = message.qos.degrade().min(sub_qos);
        message.dup = false;

        if message.qos == Qos::AtMostOnce {
            self.send_publish(&message, None);
            return;
        }

        let packet_id = self.alloc_packet_id();
        self.send_publish(&message, Some(packet_id));
        self.inflight.push_back((packet_id, message));
        let timer = self.arm_retry(packet_id);
        self.awaiting_ack.insert(packet_id, timer);
    }

    /// Dispatch one timer event.
    pub fn timeout(&mut self, event: TimeoutEvent) {
        if self.terminated {
            return;
        }
        match event {
            TimeoutEvent::AwaitingAck { packet_id } => self.retransmit(packet_id),
        }
    }

    fn retransmit(&mut self, packet_id: u16) {
        if !self.awaiting_ack.contains_key(&packet_id) {
            tracing::debug!(peer = %self.peer_addr, packet_id, "stale retry timer ignored");
            return;
        }
        let Some(message) = self
            .inflight
            .iter()
            .find(|(id, _)| *id == packet_id)
            .map(|(_, message)| message.clone())
        else {
            tracing::error!(
                peer = %self.peer_addr,
                packet_id,
                "awaiting ack without an inflight entry"
            );
            return;
        };

        let mut message = message;
        message.dup = true;
        self.metrics.retransmissions.inc();
        self.send_publish(&message, Some(packet_id));
        if let Some(entry) = self.inflight.iter_mut().find(|(id, _)| *id == packet_id) {
            entry.1.dup = true;
        }

        let timer = self.arm_retry(packet_id);
        if let Some(old) = self.awaiting_ack.insert(packet_id, timer) {
            old.cancel();
        }
    }

    /// Next packet id, wrapping 65535 -> 1; zero is never issued.
    ///
    /// Ids are not checked against outstanding inflight entries: a collision
    /// needs 65535 unacknowledged sends on one connection, and skipping
    /// in-use ids would change ack semantics for the stalled message.
    pub(crate) fn alloc_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = if id == u16::MAX { 1 } else { id + 1 };
        id
    }

    fn send_publish(&mut self, message: &Message, packet_id: Option<u16>) {
        self.send_packet(Packet::Publish(Publish::from_message(message, packet_id)));
    }

    fn arm_retry(&mut self, packet_id: u16) -> RetryTimer {
        let mailbox = self.mailbox.clone();
        let sleep = self.clock.sleep(self.config.retry_interval());
        let handle = tokio::spawn(async move {
            sleep.await;
            mailbox.timeout(TimeoutEvent::AwaitingAck { packet_id });
        });
        RetryTimer { handle }
    }
}
