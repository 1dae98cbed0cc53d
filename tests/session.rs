//! End-to-end session scenarios: connect gating, QoS 1 round trips,
//! retransmission, ACL handling, and will emission.

use bytes::Bytes;
use parking_lot::Mutex;
use photon::broker::{
    Access, AclAction, AclProvider, ClientInfo, Collaborators, Hooks, Router, SubscribeOptions,
};
use photon::packet::{
    Connect, ConnackCode, LastWill, Message, Packet, Publish, Qos, Subscribe, Unsubscribe,
};
use photon::session::{run_session, session_channel, ChannelSink, Session, SessionEvent};
use photon::time::SystemClock;
use photon::{PacketMetrics, ProtocolConfig, ProtocolError, ShutdownReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Recorders
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingRouter {
    published: Mutex<Vec<Message>>,
    subscribed: Mutex<Vec<(String, String, Qos)>>,
    qos_updates: Mutex<Vec<(String, String, Qos)>>,
    unsubscribed: Mutex<Vec<(String, String)>>,
}

impl Router for RecordingRouter {
    fn publish(&self, message: Message) {
        self.published.lock().push(message);
    }

    fn subscribe(&self, filter: &str, client_id: &str, opts: SubscribeOptions) {
        self.subscribed
            .lock()
            .push((filter.to_string(), client_id.to_string(), opts.qos));
    }

    fn unsubscribe(&self, filter: &str, client_id: &str) {
        self.unsubscribed
            .lock()
            .push((filter.to_string(), client_id.to_string()));
    }

    fn set_qos(&self, filter: &str, client_id: &str, qos: Qos) {
        self.qos_updates
            .lock()
            .push((filter.to_string(), client_id.to_string(), qos));
    }
}

#[derive(Default)]
struct RecordingHooks {
    connected: Mutex<Vec<u8>>,
    acked_topics: Mutex<Vec<String>>,
    disconnected: Mutex<Vec<ShutdownReason>>,
}

impl Hooks for RecordingHooks {
    fn client_connected(&self, _client: &ClientInfo, code: ConnackCode) {
        self.connected.lock().push(code.as_u8());
    }

    fn message_acked(&self, _client: &ClientInfo, message: &Message) {
        self.acked_topics.lock().push(message.topic.clone());
    }

    fn client_disconnected(&self, _client: &ClientInfo, reason: ShutdownReason) {
        self.disconnected.lock().push(reason);
    }
}

/// Denies one action/topic pair, allows everything else, and counts checks.
struct SelectiveAcl {
    deny_action: AclAction,
    deny_topic: String,
    checks: Mutex<u32>,
}

impl SelectiveAcl {
    fn deny(action: AclAction, topic: &str) -> Self {
        Self {
            deny_action: action,
            deny_topic: topic.to_string(),
            checks: Mutex::new(0),
        }
    }

    fn allow_all() -> Self {
        // An empty topic never reaches the ACL: validation rejects it first.
        Self::deny(AclAction::Publish, "")
    }
}

impl AclProvider for SelectiveAcl {
    fn check(&self, _client: &ClientInfo, action: AclAction, topic: &str) -> Access {
        *self.checks.lock() += 1;
        if action == self.deny_action && topic == self.deny_topic {
            Access::Deny
        } else {
            Access::Allow
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    session: Session,
    outbound: mpsc::UnboundedReceiver<Packet>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    router: Arc<RecordingRouter>,
    hooks: Arc<RecordingHooks>,
    acl: Arc<SelectiveAcl>,
}

fn harness() -> Harness {
    harness_with(Arc::new(SelectiveAcl::allow_all()), ProtocolConfig::default())
}

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

fn harness_with(acl: Arc<SelectiveAcl>, config: ProtocolConfig) -> Harness {
    init_logging();
    let router = Arc::new(RecordingRouter::default());
    let hooks = Arc::new(RecordingHooks::default());
    let collab = Collaborators {
        acl: acl.clone(),
        router: router.clone(),
        hooks: hooks.clone(),
        ..Collaborators::default()
    };
    let (sink, outbound) = ChannelSink::new();
    let (handle, events) = session_channel();
    let session = Session::new(
        "127.0.0.1:49152".parse().unwrap(),
        Box::new(sink),
        handle,
        config,
        collab,
        Arc::new(PacketMetrics::new()),
        SystemClock,
    );
    Harness {
        session,
        outbound,
        events,
        router,
        hooks,
        acl,
    }
}

fn connect_packet(client_id: &str) -> Packet {
    connect_with(client_id, true, None)
}

fn connect_with(client_id: &str, clean_session: bool, will: Option<LastWill>) -> Packet {
    Packet::Connect(Connect {
        proto_ver: 4,
        proto_name: "MQTT".into(),
        client_id: client_id.into(),
        clean_session,
        keepalive_secs: 60,
        username: None,
        password: None,
        will,
    })
}

fn subscribe_packet(packet_id: u16, topics: &[(&str, Qos)]) -> Packet {
    Packet::Subscribe(Subscribe {
        packet_id,
        topics: topics
            .iter()
            .map(|(filter, qos)| ((*filter).to_string(), *qos))
            .collect(),
    })
}

fn message(topic: &str, qos: Qos) -> Message {
    Message {
        topic: topic.into(),
        payload: Bytes::from_static(b"hello"),
        qos,
        retain: false,
        dup: false,
        from: None,
    }
}

fn expect_publish(packet: Packet) -> Publish {
    match packet {
        Packet::Publish(publish) => publish,
        other => panic!("expected PUBLISH, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Connect gating
// ---------------------------------------------------------------------------

#[test]
fn accepts_a_well_formed_connect() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();

    assert_eq!(
        h.outbound.try_recv().unwrap(),
        Packet::Connack {
            session_present: false,
            code: ConnackCode::Accepted
        }
    );
    assert!(h.session.is_connected());
    assert_eq!(h.session.client_id(), "c1");
    assert_eq!(h.hooks.connected.lock().as_slice(), &[0]);
    assert_eq!(h.session.keepalive_window(), Some(Duration::from_secs(75)));
}

#[test]
fn refuses_an_unknown_protocol_version() {
    let mut h = harness();
    let packet = Packet::Connect(Connect {
        proto_ver: 5,
        proto_name: "MQTT".into(),
        client_id: "c1".into(),
        clean_session: true,
        keepalive_secs: 60,
        username: None,
        password: None,
        will: None,
    });
    h.session.receive(packet).unwrap();

    assert_eq!(
        h.outbound.try_recv().unwrap(),
        Packet::Connack {
            session_present: false,
            code: ConnackCode::UnacceptableProtocolVersion
        }
    );
    assert!(!h.session.is_connected());
    assert!(!h.session.is_terminated());
}

#[test]
fn generates_an_id_for_empty_v311_clients() {
    let mut h = harness();
    h.session.receive(connect_packet("")).unwrap();

    assert!(h.session.is_connected());
    let id = h.session.client_id();
    assert!(id.starts_with("emqttd_"), "unexpected generated id {id}");
    assert!(id["emqttd_".len()..].chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn refuses_an_empty_id_that_wants_session_state() {
    let mut h = harness();
    h.session.receive(connect_with("", false, None)).unwrap();

    assert_eq!(
        h.outbound.try_recv().unwrap(),
        Packet::Connack {
            session_present: false,
            code: ConnackCode::IdentifierRejected
        }
    );
    assert!(!h.session.is_connected());
}

// ---------------------------------------------------------------------------
// QoS 1 delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn qos1_round_trip_clears_inflight_state() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();

    h.session
        .receive(subscribe_packet(1, &[("t", Qos::AtLeastOnce)]))
        .unwrap();
    match h.outbound.try_recv().unwrap() {
        Packet::Suback { granted, .. } => assert_eq!(granted, vec![1]),
        other => panic!("expected SUBACK, got {other}"),
    }
    assert_eq!(
        h.router.subscribed.lock().as_slice(),
        &[("t".to_string(), "c1".to_string(), Qos::AtLeastOnce)]
    );

    h.session.deliver("t", message("t", Qos::AtLeastOnce));
    let publish = expect_publish(h.outbound.try_recv().unwrap());
    assert_eq!(publish.qos, Qos::AtLeastOnce);
    assert_eq!(publish.packet_id, Some(1));
    assert!(!publish.dup);
    assert_eq!(h.session.inflight_packet_ids(), vec![1]);
    assert_eq!(h.session.awaiting_ack_ids(), vec![1]);

    h.session.receive(Packet::Puback { packet_id: 1 }).unwrap();
    assert!(h.session.inflight_packet_ids().is_empty());
    assert!(h.session.awaiting_ack_ids().is_empty());
    assert_eq!(h.hooks.acked_topics.lock().as_slice(), &["t".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn unacked_messages_are_retransmitted_as_duplicates() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();
    h.session
        .receive(subscribe_packet(1, &[("t", Qos::AtLeastOnce)]))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session.deliver("t", message("t", Qos::AtLeastOnce));
    let first = expect_publish(h.outbound.try_recv().unwrap());
    assert_eq!(first.packet_id, Some(1));
    assert!(!first.dup);

    // No PUBACK: the retry timer posts back into the mailbox.
    let event = h.events.recv().await.expect("retry timer event");
    match event {
        SessionEvent::Timeout(timeout) => h.session.timeout(timeout),
        other => panic!("expected timeout event, got {other:?}"),
    }

    let second = expect_publish(h.outbound.try_recv().unwrap());
    assert_eq!(second.packet_id, Some(1), "retransmit must keep the packet id");
    assert!(second.dup);
    assert_eq!(h.session.inflight_packet_ids(), vec![1]);
    assert_eq!(h.session.awaiting_ack_ids(), vec![1]);

    // The re-armed timer keeps firing until the ack arrives.
    let event = h.events.recv().await.expect("second retry");
    if let SessionEvent::Timeout(timeout) = event {
        h.session.timeout(timeout);
    }
    let third = expect_publish(h.outbound.try_recv().unwrap());
    assert!(third.dup);

    h.session.receive(Packet::Puback { packet_id: 1 }).unwrap();
    assert!(h.session.awaiting_ack_ids().is_empty());
}

#[tokio::test]
async fn qos2_messages_are_delivered_at_qos1() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();
    h.session
        .receive(subscribe_packet(1, &[("t", Qos::AtLeastOnce)]))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session.deliver("t", message("t", Qos::ExactlyOnce));
    let publish = expect_publish(h.outbound.try_recv().unwrap());
    assert_eq!(publish.qos, Qos::AtLeastOnce);
    assert_eq!(publish.packet_id, Some(1));
    assert_eq!(h.session.inflight_packet_ids(), vec![1]);
}

#[tokio::test]
async fn delivery_is_capped_by_the_granted_qos() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();
    h.session
        .receive(subscribe_packet(1, &[("t", Qos::AtMostOnce)]))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session.deliver("t", message("t", Qos::AtLeastOnce));
    let publish = expect_publish(h.outbound.try_recv().unwrap());
    assert_eq!(publish.qos, Qos::AtMostOnce);
    assert_eq!(publish.packet_id, None);
    assert!(h.session.inflight_packet_ids().is_empty());
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[test]
fn one_denied_filter_fails_the_whole_batch() {
    let acl = Arc::new(SelectiveAcl::deny(AclAction::Subscribe, "secret/#"));
    let mut h = harness_with(acl, ProtocolConfig::default());
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();

    h.session
        .receive(subscribe_packet(
            7,
            &[("ok/a", Qos::AtMostOnce), ("secret/#", Qos::AtLeastOnce)],
        ))
        .unwrap();
    match h.outbound.try_recv().unwrap() {
        Packet::Suback { packet_id, granted } => {
            assert_eq!(packet_id, 7);
            assert_eq!(granted, vec![0x80, 0x80]);
        }
        other => panic!("expected SUBACK, got {other}"),
    }
    assert_eq!(h.session.granted_qos("ok/a"), None);
    assert_eq!(h.session.granted_qos("secret/#"), None);
    assert!(h.router.subscribed.lock().is_empty());
}

#[test]
fn resubscribing_at_a_new_qos_updates_the_router() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();

    h.session
        .receive(subscribe_packet(1, &[("t", Qos::AtMostOnce)]))
        .unwrap();
    h.outbound.try_recv().unwrap();
    h.session
        .receive(subscribe_packet(2, &[("t", Qos::AtLeastOnce)]))
        .unwrap();
    h.outbound.try_recv().unwrap();

    assert_eq!(h.session.granted_qos("t"), Some(Qos::AtLeastOnce));
    assert_eq!(
        h.router.qos_updates.lock().as_slice(),
        &[("t".to_string(), "c1".to_string(), Qos::AtLeastOnce)]
    );
    // Only the first subscribe installed a router entry.
    assert_eq!(h.router.subscribed.lock().len(), 1);
}

#[test]
fn unsubscribe_removes_only_known_filters() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();
    h.session
        .receive(subscribe_packet(1, &[("t", Qos::AtLeastOnce)]))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session
        .receive(Packet::Unsubscribe(Unsubscribe {
            packet_id: 2,
            topics: vec!["t".into(), "unknown".into()],
        }))
        .unwrap();
    assert_eq!(h.outbound.try_recv().unwrap(), Packet::Unsuback { packet_id: 2 });
    assert_eq!(h.session.granted_qos("t"), None);
    assert_eq!(
        h.router.unsubscribed.lock().as_slice(),
        &[("t".to_string(), "c1".to_string())]
    );
}

// ---------------------------------------------------------------------------
// Publish ingress and the ACL cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn qos1_publish_is_routed_then_acked() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();

    let publish = Packet::Publish(Publish {
        topic: "t".into(),
        payload: Bytes::from_static(b"in"),
        qos: Qos::AtLeastOnce,
        retain: false,
        dup: false,
        packet_id: Some(11),
    });
    h.session.receive(publish).unwrap();

    assert_eq!(h.outbound.try_recv().unwrap(), Packet::Puback { packet_id: 11 });
    let published = h.router.published.lock();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "t");
    assert_eq!(published[0].from.as_ref().unwrap().client_id, "c1");
}

#[tokio::test]
async fn denied_publish_is_dropped_without_an_ack() {
    let acl = Arc::new(SelectiveAcl::deny(AclAction::Publish, "locked"));
    let mut h = harness_with(acl, ProtocolConfig::default());
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();

    let publish = Packet::Publish(Publish {
        topic: "locked".into(),
        payload: Bytes::new(),
        qos: Qos::AtLeastOnce,
        retain: false,
        dup: false,
        packet_id: Some(5),
    });
    h.session.receive(publish).unwrap();

    assert!(h.outbound.try_recv().is_err(), "no ack for a denied publish");
    assert!(h.router.published.lock().is_empty());
    assert!(!h.session.is_terminated());
}

#[tokio::test]
async fn publish_acl_decisions_are_cached_per_topic() {
    let mut h = harness();
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();
    let baseline = *h.acl.checks.lock();

    for pid in [1u16, 2, 3] {
        let publish = Packet::Publish(Publish {
            topic: "cached".into(),
            payload: Bytes::new(),
            qos: Qos::AtLeastOnce,
            retain: false,
            dup: false,
            packet_id: Some(pid),
        });
        h.session.receive(publish).unwrap();
    }
    assert_eq!(*h.acl.checks.lock() - baseline, 1);
}

#[tokio::test]
async fn acl_cache_can_be_disabled() {
    let config = ProtocolConfig {
        cache_acl: false,
        ..ProtocolConfig::default()
    };
    let mut h = harness_with(Arc::new(SelectiveAcl::allow_all()), config);
    h.session.receive(connect_packet("c1")).unwrap();
    h.outbound.try_recv().unwrap();
    let baseline = *h.acl.checks.lock();

    for pid in [1u16, 2] {
        let publish = Packet::Publish(Publish {
            topic: "uncached".into(),
            payload: Bytes::new(),
            qos: Qos::AtLeastOnce,
            retain: false,
            dup: false,
            packet_id: Some(pid),
        });
        h.session.receive(publish).unwrap();
    }
    assert_eq!(*h.acl.checks.lock() - baseline, 2);
}

// ---------------------------------------------------------------------------
// Termination and the will
// ---------------------------------------------------------------------------

fn will() -> LastWill {
    LastWill {
        topic: "last/words".into(),
        payload: Bytes::from_static(b"gone"),
        qos: Qos::AtLeastOnce,
        retain: false,
    }
}

#[test]
fn clean_disconnect_discards_the_will() {
    let mut h = harness();
    h.session
        .receive(connect_with("c1", true, Some(will())))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session.receive(Packet::Disconnect).unwrap();
    assert!(h.session.is_terminated());
    assert!(h.router.published.lock().is_empty());
    assert_eq!(h.hooks.disconnected.lock().as_slice(), &[ShutdownReason::Normal]);
}

#[test]
fn abnormal_shutdown_publishes_the_will() {
    let mut h = harness();
    h.session
        .receive(connect_with("c1", true, Some(will())))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session.shutdown(ShutdownReason::SocketError);
    let published = h.router.published.lock();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "last/words");
    assert_eq!(published[0].from.as_ref().unwrap().client_id, "c1");
    drop(published);
    assert_eq!(
        h.hooks.disconnected.lock().as_slice(),
        &[ShutdownReason::SocketError]
    );
}

#[test]
fn takeover_conflict_suppresses_the_will() {
    let mut h = harness();
    h.session
        .receive(connect_with("c1", true, Some(will())))
        .unwrap();
    h.outbound.try_recv().unwrap();

    h.session.shutdown(ShutdownReason::Conflict);
    assert!(h.router.published.lock().is_empty());
    assert_eq!(
        h.hooks.disconnected.lock().as_slice(),
        &[ShutdownReason::Conflict]
    );
}

#[test]
fn shutdown_before_connect_emits_nothing() {
    let mut h = harness();
    h.session.shutdown(ShutdownReason::SocketError);
    assert!(h.router.published.lock().is_empty());
    assert!(h.hooks.disconnected.lock().is_empty());
}

// ---------------------------------------------------------------------------
// The mailbox runner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_session_processes_a_clean_lifecycle() {
    let hooks = Arc::new(RecordingHooks::default());
    let collab = Collaborators {
        hooks: hooks.clone(),
        ..Collaborators::default()
    };
    let (sink, _outbound) = ChannelSink::new();
    let (handle, events) = session_channel();
    let session = Session::new(
        "127.0.0.1:49153".parse().unwrap(),
        Box::new(sink),
        handle.clone(),
        ProtocolConfig::default(),
        collab,
        Arc::new(PacketMetrics::new()),
        SystemClock,
    );
    let runner = tokio::spawn(run_session(session, events));

    handle.packet(connect_packet("c1"));
    handle.packet(Packet::Disconnect);
    // The runner observes termination and returns on its own.
    runner.await.unwrap().unwrap();
    assert_eq!(hooks.disconnected.lock().as_slice(), &[ShutdownReason::Normal]);
}

#[tokio::test]
async fn run_session_surfaces_protocol_violations() {
    let (sink, _outbound) = ChannelSink::new();
    let (handle, events) = session_channel();
    let session = Session::new(
        "127.0.0.1:49154".parse().unwrap(),
        Box::new(sink),
        handle.clone(),
        ProtocolConfig::default(),
        Collaborators::default(),
        Arc::new(PacketMetrics::new()),
        SystemClock,
    );
    let runner = tokio::spawn(run_session(session, events));

    handle.packet(Packet::Pingreq);
    let result = runner.await.unwrap();
    assert_eq!(result, Err(ProtocolError::NotConnected));
}

#[tokio::test]
async fn run_session_honors_injected_shutdowns() {
    let router = Arc::new(RecordingRouter::default());
    let collab = Collaborators {
        router: router.clone(),
        ..Collaborators::default()
    };
    let (sink, _outbound) = ChannelSink::new();
    let (handle, events) = session_channel();
    let session = Session::new(
        "127.0.0.1:49155".parse().unwrap(),
        Box::new(sink),
        handle.clone(),
        ProtocolConfig::default(),
        collab,
        Arc::new(PacketMetrics::new()),
        SystemClock,
    );
    let runner = tokio::spawn(run_session(session, events));

    handle.packet(connect_with("c1", true, Some(will())));
    handle.shutdown(ShutdownReason::SocketError);
    runner.await.unwrap().unwrap();
    assert_eq!(router.published.lock().len(), 1);
    assert_eq!(router.published.lock()[0].topic, "last/words");
}
