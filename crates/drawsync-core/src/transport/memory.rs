//! In-process relay for tests and local demos.
//!
//! Single-threaded: the relay and every transport attached to it share one
//! `Rc<RefCell<..>>`. Like a real broker, a publish is delivered to every
//! subscriber of the destination, including the publisher itself.

use super::{Transport, TransportError, TransportEvent, TransportResult};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Default)]
struct Link {
    connected: bool,
    subscriptions: HashSet<String>,
    events: Vec<TransportEvent>,
}

#[derive(Debug)]
struct RelayState {
    reachable: bool,
    links: HashMap<usize, Link>,
    next_link: usize,
    connect_attempts: usize,
    published: Vec<(String, String)>,
}

/// Handle to an in-process relay. Cloning shares the same relay.
#[derive(Debug, Clone)]
pub struct MemoryRelay {
    state: Rc<RefCell<RelayState>>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelay {
    /// Create a reachable relay with no clients.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(RelayState {
                reachable: true,
                links: HashMap::new(),
                next_link: 0,
                connect_attempts: 0,
                published: Vec::new(),
            })),
        }
    }

    /// Create a transport attached to this relay.
    pub fn transport(&self) -> MemoryTransport {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_link;
            state.next_link += 1;
            state.links.insert(id, Link::default());
            id
        };
        MemoryTransport {
            relay: self.clone(),
            id,
        }
    }

    /// Make the relay reachable or not. Going unreachable drops every live
    /// connection and fails subsequent connection attempts.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.borrow_mut();
        state.reachable = reachable;
        if !reachable {
            for link in state.links.values_mut() {
                if link.connected {
                    link.connected = false;
                    link.subscriptions.clear();
                    link.events.push(TransportEvent::Disconnected);
                }
            }
        }
    }

    /// Drop every live connection without making the relay unreachable.
    pub fn drop_connections(&self) {
        self.set_reachable(false);
        self.state.borrow_mut().reachable = true;
    }

    pub fn is_reachable(&self) -> bool {
        self.state.borrow().reachable
    }

    /// Every `(destination, body)` published so far.
    pub fn published(&self) -> Vec<(String, String)> {
        self.state.borrow().published.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state.borrow().published.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.borrow().connect_attempts
    }

    /// Number of live connections subscribed to `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.state
            .borrow()
            .links
            .values()
            .filter(|link| link.connected && link.subscriptions.contains(destination))
            .count()
    }
}

/// Transport attached to a [`MemoryRelay`].
#[derive(Debug)]
pub struct MemoryTransport {
    relay: MemoryRelay,
    id: usize,
}

impl MemoryTransport {
    fn with_link<R>(&self, f: impl FnOnce(&mut Link) -> R) -> R {
        let mut state = self.relay.state.borrow_mut();
        let link = state.links.entry(self.id).or_default();
        f(link)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, endpoint: &str) -> TransportResult<()> {
        if endpoint.is_empty() {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
        let mut state = self.relay.state.borrow_mut();
        state.connect_attempts += 1;
        let reachable = state.reachable;
        let link = state.links.entry(self.id).or_default();
        // Events from an earlier connection are stale once a new attempt starts.
        link.events.clear();
        link.subscriptions.clear();
        if reachable {
            link.connected = true;
            link.events.push(TransportEvent::Connected);
        } else {
            link.connected = false;
            link.events.push(TransportEvent::Error {
                message: format!("Relay {} unreachable", endpoint),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.with_link(|link| {
            link.connected = false;
            link.subscriptions.clear();
        });
    }

    fn is_connected(&self) -> bool {
        self.relay
            .state
            .borrow()
            .links
            .get(&self.id)
            .is_some_and(|link| link.connected)
    }

    fn subscribe(&mut self, destination: &str) -> TransportResult<()> {
        self.with_link(|link| {
            if !link.connected {
                return Err(TransportError::NotConnected);
            }
            link.subscriptions.insert(destination.to_string());
            Ok(())
        })
    }

    fn publish(&mut self, destination: &str, body: &str) -> TransportResult<()> {
        let mut state = self.relay.state.borrow_mut();
        if !state.links.get(&self.id).is_some_and(|link| link.connected) {
            return Err(TransportError::NotConnected);
        }
        state.published.push((destination.to_string(), body.to_string()));
        for link in state.links.values_mut() {
            if link.connected && link.subscriptions.contains(destination) {
                link.events.push(TransportEvent::Message {
                    destination: destination.to_string(),
                    body: body.to_string(),
                });
            }
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.with_link(|link| std::mem::take(&mut link.events))
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.relay.state.borrow_mut().links.remove(&self.id);
    }
}
