//! Publish/subscribe transport abstraction.
//!
//! A [`Transport`] owns one connection to a relay. Connecting is
//! asynchronous: `connect` only starts the attempt and the outcome arrives
//! later as a [`TransportEvent`] from `poll_events`.

mod memory;
mod native;
pub mod stomp;

pub use memory::{MemoryRelay, MemoryTransport};
pub use native::{StompWebSocket, DEFAULT_ENDPOINT, STOMP_SUBPROTOCOL};
pub(crate) use native::preview;

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Events reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed; the channel is usable.
    Connected,
    /// A previously established connection went away.
    Disconnected,
    /// A connection attempt or live connection failed.
    Error { message: String },
    /// A message published on a subscribed destination.
    Message { destination: String, body: String },
}

/// Connection to a publish/subscribe relay.
pub trait Transport {
    /// Start connecting to `endpoint`, replacing any previous connection.
    fn connect(&mut self, endpoint: &str) -> TransportResult<()>;

    /// Close the connection, if any.
    fn disconnect(&mut self);

    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;

    /// Subscribe to a destination. Requires a live connection.
    fn subscribe(&mut self, destination: &str) -> TransportResult<()>;

    /// Publish a text body to a destination. Requires a live connection.
    fn publish(&mut self, destination: &str, body: &str) -> TransportResult<()>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, endpoint: &str) -> TransportResult<()> {
        (**self).connect(endpoint)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn subscribe(&mut self, destination: &str) -> TransportResult<()> {
        (**self).subscribe(destination)
    }

    fn publish(&mut self, destination: &str, body: &str) -> TransportResult<()> {
        (**self).publish(destination, body)
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        (**self).poll_events()
    }
}
