//! Contracts consumed from the surrounding broker.
//!
//! The session never owns routing, authentication, authorization, or the
//! client registry; it calls them through these traits. All implementations
//! are expected to be non-blocking (or bounded-latency) so one session can
//! never stall the others. Permissive no-op implementations ship for
//! embedding, examples, and tests.

use crate::error::ShutdownReason;
use crate::packet::{ConnackCode, Message, Qos};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Identity of one connected client, as passed to backends and hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: String,
    pub username: Option<String>,
    pub peer_addr: SocketAddr,
}

/// Outcome of an ACL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

/// What a client is trying to do with a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    Publish,
    Subscribe,
}

/// Options attached to a router subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Granted QoS, already capped at 1.
    pub qos: Qos,
}

/// Credentials were rejected by the auth backend.
#[derive(Debug, Clone, Error)]
#[error("credentials rejected: {0}")]
pub struct AuthDenied(pub String);

/// Authenticates a client at CONNECT time.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, client: &ClientInfo, password: Option<&[u8]>)
        -> Result<(), AuthDenied>;
}

/// Authorizes publish and subscribe operations per topic.
pub trait AclProvider: Send + Sync {
    fn check(&self, client: &ClientInfo, action: AclAction, topic: &str) -> Access;
}

/// The topic router: owns subscription state and fans out publishes.
pub trait Router: Send + Sync {
    fn publish(&self, message: Message);
    fn subscribe(&self, filter: &str, client_id: &str, opts: SubscribeOptions);
    fn unsubscribe(&self, filter: &str, client_id: &str);
    fn set_qos(&self, filter: &str, client_id: &str, qos: Qos);
}

/// The shared client registry mediating takeovers.
///
/// Registration is fire-and-forget: a conflicting registration causes the
/// prior holder to receive a `Conflict` shutdown through its own mailbox,
/// never synchronously through this call.
pub trait Registry: Send + Sync {
    fn register(&self, client: &ClientInfo);
}

/// Hook points fired at protocol milestones.
///
/// The subscribe/unsubscribe hooks may rewrite the topic table before the
/// session installs it. All methods default to no-ops.
pub trait Hooks: Send + Sync {
    fn client_connected(&self, _client: &ClientInfo, _code: ConnackCode) {}

    fn client_subscribe(&self, _client: &ClientInfo, table: Vec<(String, Qos)>) -> Vec<(String, Qos)> {
        table
    }

    fn client_subscribed(&self, _client: &ClientInfo, _filter: &str, _qos: Qos) {}

    fn client_unsubscribe(&self, _client: &ClientInfo, topics: Vec<String>) -> Vec<String> {
        topics
    }

    fn message_acked(&self, _client: &ClientInfo, _message: &Message) {}

    fn client_disconnected(&self, _client: &ClientInfo, _reason: ShutdownReason) {}
}

// ---------------------------------------------------------------------------
// Generated client identifiers
// ---------------------------------------------------------------------------

const GENERATED_ID_PREFIX: &str = "emqttd_";

/// Monotonic client-id generator for MQTT 3.1.1 clients that connect with an
/// empty identifier. Shared across sessions; ids are `emqttd_<n>` with `n`
/// strictly increasing for the life of the process.
#[derive(Debug)]
pub struct ClientIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl Default for ClientIdGenerator {
    fn default() -> Self {
        Self::new(GENERATED_ID_PREFIX)
    }
}

impl ClientIdGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(1),
        }
    }

    pub fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}

// ---------------------------------------------------------------------------
// Permissive defaults
// ---------------------------------------------------------------------------

/// Accepts any credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuth;

impl AuthProvider for AllowAllAuth {
    fn authenticate(&self, _client: &ClientInfo, _password: Option<&[u8]>) -> Result<(), AuthDenied> {
        Ok(())
    }
}

/// Allows every publish and subscribe.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAcl;

impl AclProvider for AllowAllAcl {
    fn check(&self, _client: &ClientInfo, _action: AclAction, _topic: &str) -> Access {
        Access::Allow
    }
}

/// Swallows every router call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRouter;

impl Router for NoopRouter {
    fn publish(&self, _message: Message) {}
    fn subscribe(&self, _filter: &str, _client_id: &str, _opts: SubscribeOptions) {}
    fn unsubscribe(&self, _filter: &str, _client_id: &str) {}
    fn set_qos(&self, _filter: &str, _client_id: &str, _qos: Qos) {}
}

/// Registry that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

impl Registry for NoopRegistry {
    fn register(&self, _client: &ClientInfo) {}
}

/// Hooks with every method left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl Hooks for DefaultHooks {}

/// Bundle of collaborator handles given to each session.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: std::sync::Arc<dyn AuthProvider>,
    pub acl: std::sync::Arc<dyn AclProvider>,
    pub router: std::sync::Arc<dyn Router>,
    pub registry: std::sync::Arc<dyn Registry>,
    pub hooks: std::sync::Arc<dyn Hooks>,
    pub client_ids: std::sync::Arc<ClientIdGenerator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            auth: std::sync::Arc::new(AllowAllAuth),
            acl: std::sync::Arc::new(AllowAllAcl),
            router: std::sync::Arc::new(NoopRouter),
            registry: std::sync::Arc::new(NoopRegistry),
            hooks: std::sync::Arc::new(DefaultHooks),
            client_ids: std::sync::Arc::new(ClientIdGenerator::default()),
        }
    }
}
