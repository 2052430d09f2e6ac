//! Publish/subscribe transport used by chat sessions.
//!
//! A `Transport` is a connection factory. The `Connection` it yields is owned
//! by exactly one session; every operation on it is fire-and-forget and
//! inbound traffic (messages, errors, close) is reported through the
//! `EventCallback` handed to `connect`.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::error::TransportError;

#[cfg(test)]
pub(crate) mod fake;
pub mod frame;
pub mod stomp;

pub use stomp::{DEFAULT_WS_URL, StompTransport};

/// Handle of one topic subscription on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parse the wire form (`sub-N`)
    pub fn parse(value: &str) -> Option<Self> {
        value
            .strip_prefix("sub-")
            .and_then(|n| n.parse::<u64>().ok())
            .map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Something that happened on an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message body delivered on a subscription
    Message {
        subscription: SubscriptionId,
        body: String,
    },
    /// The broker reported an error
    Error(String),
    /// The connection went away
    Closed,
}

/// Receives transport events; invoked from the transport's own tasks
pub type EventCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Connection factory
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection; resolves once the broker accepted the session
    async fn connect(&self, on_event: EventCallback)
    -> Result<Box<dyn Connection>, TransportError>;
}

/// An open connection
pub trait Connection: Send {
    /// Subscribe to `topic`; bodies arrive as `TransportEvent::Message`
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, TransportError>;

    /// Release a subscription
    fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError>;

    /// Send `body` to `destination` without waiting for acknowledgement
    fn publish(&mut self, destination: &str, body: &str) -> Result<(), TransportError>;

    /// Close the connection; later calls are no-ops
    fn deactivate(&mut self);
}
