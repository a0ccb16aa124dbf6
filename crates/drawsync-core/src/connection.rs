//! Session channel management.
//!
//! [`ConnectionManager`] keeps exactly one publish/subscribe channel bound to
//! a session topic alive. A liveness check runs on a fixed cadence; whenever
//! it finds the channel down it starts a new connection attempt. There is no
//! retry limit and no backoff, and messages sent while disconnected are
//! dropped rather than queued.
//!
//! State machine:
//! ```text
//! Disconnected --check--> Connecting --connected--> Connected
//!      ^                      |                         |
//!      +------error/timeout---+-------lost/error--------+
//! ```

use crate::protocol::SessionId;
use crate::transport::{DEFAULT_ENDPOINT, Transport, TransportEvent};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Interval between liveness checks.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_millis(2000);

/// How long a connection attempt may stay in flight before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Relay endpoint handed to the transport.
    pub endpoint: String,
    pub liveness_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Periodic liveness timer owned by a [`ConnectionManager`].
///
/// Deadline based: the owner asks [`Heartbeat::is_due`] from its event loop.
/// Once stopped it never fires again.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Heartbeat {
    /// Start a heartbeat whose first beat is one interval after `now`.
    pub fn start(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: Some(now + interval),
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Whether a beat is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    /// Schedule the next beat one interval after `now`.
    pub fn rearm(&mut self, now: Instant) {
        if self.next_due.is_some() {
            self.next_due = Some(now + self.interval);
        }
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }
}

/// Callback receiving the raw body of every message on the session topic.
pub type MessageHandler = Box<dyn FnMut(&str)>;

/// Keeps one session channel alive and provides send/receive on it.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    session: SessionId,
    topic: String,
    options: ConnectionOptions,
    state: ConnectionState,
    /// Start of the in-flight attempt while `Connecting`.
    attempt_started: Option<Instant>,
    heartbeat: Heartbeat,
    on_message: MessageHandler,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager for `session`, start its heartbeat and make a first
    /// connection attempt right away.
    ///
    /// An empty session id is not rejected; it yields the degenerate topic
    /// `/topic/`.
    pub fn create(
        on_message: impl FnMut(&str) + 'static,
        session: SessionId,
        transport: T,
        options: ConnectionOptions,
    ) -> Self {
        Self::create_at(on_message, session, transport, options, Instant::now())
    }

    /// [`Self::create`] with an explicit start time.
    pub fn create_at(
        on_message: impl FnMut(&str) + 'static,
        session: SessionId,
        transport: T,
        options: ConnectionOptions,
        now: Instant,
    ) -> Self {
        if session.is_empty() {
            log::warn!("Creating connection for an empty session id");
        }
        let mut manager = Self {
            transport,
            topic: session.topic(),
            session,
            heartbeat: Heartbeat::start(options.liveness_interval, now),
            options,
            state: ConnectionState::Disconnected,
            attempt_started: None,
            on_message: Box::new(on_message),
        };
        manager.check_connection_at(now);
        manager
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Relay topic this manager publishes and subscribes on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Liveness check. Does nothing while connected or while an attempt is
    /// in flight; otherwise starts a new connection attempt.
    pub fn check_connection(&mut self) {
        self.check_connection_at(Instant::now());
    }

    /// [`Self::check_connection`] with an explicit current time.
    pub fn check_connection_at(&mut self, now: Instant) {
        if !self.heartbeat.is_running() {
            return;
        }

        match self.state {
            ConnectionState::Connected if self.transport.is_connected() => return,
            ConnectionState::Connected => {
                log::info!("Connection to {} lost", self.topic);
                self.state = ConnectionState::Disconnected;
            }
            ConnectionState::Connecting => {
                let stale = self
                    .attempt_started
                    .is_some_and(|started| now.duration_since(started) >= self.options.connect_timeout);
                if !stale {
                    return;
                }
                self.on_error("connection attempt timed out");
            }
            ConnectionState::Disconnected => {}
        }

        log::debug!("No connection for {}, connecting to {}", self.topic, self.options.endpoint);
        self.transport.disconnect();
        self.state = ConnectionState::Connecting;
        self.attempt_started = Some(now);
        if let Err(e) = self.transport.connect(&self.options.endpoint) {
            self.on_error(&e.to_string());
        }
    }

    /// Drive the manager from the event loop.
    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// [`Self::poll`] with an explicit current time: handles pending
    /// transport events, runs the liveness check if the heartbeat is due,
    /// then handles whatever that check produced.
    pub fn poll_at(&mut self, now: Instant) {
        self.drain_events();
        if self.heartbeat.is_due(now) {
            self.heartbeat.rearm(now);
            self.check_connection_at(now);
            self.drain_events();
        }
    }

    fn drain_events(&mut self) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected => self.on_connected(),
                TransportEvent::Disconnected => {
                    if self.state != ConnectionState::Disconnected {
                        log::info!("Disconnected from {}", self.topic);
                        self.state = ConnectionState::Disconnected;
                        self.attempt_started = None;
                    }
                }
                TransportEvent::Error { message } => self.on_error(&message),
                TransportEvent::Message { destination, body } => {
                    if destination == self.topic {
                        (self.on_message)(&body);
                    } else {
                        log::debug!("Ignoring message for {}", destination);
                    }
                }
            }
        }
    }

    fn on_connected(&mut self) {
        if self.state == ConnectionState::Connected || !self.transport.is_connected() {
            return;
        }
        match self.transport.subscribe(&self.topic) {
            Ok(()) => {
                log::info!("Connected, subscribed to {}", self.topic);
                self.state = ConnectionState::Connected;
                self.attempt_started = None;
            }
            Err(e) => self.on_error(&format!("subscribe failed: {}", e)),
        }
    }

    /// Failed attempt or broken channel. Never surfaced to the caller; the
    /// next liveness check retries.
    fn on_error(&mut self, message: &str) {
        log::warn!("Connection error on {}: {}", self.topic, message);
        self.state = ConnectionState::Disconnected;
        self.attempt_started = None;
    }

    /// Serialize `message` as JSON and publish it on the session topic.
    ///
    /// Only publishes while connected; otherwise the message is dropped.
    /// Returns whether it was handed to the transport.
    pub fn send_message<M: Serialize>(&mut self, message: &M) -> bool {
        match serde_json::to_string(message) {
            Ok(body) => self.send_raw(&body),
            Err(e) => {
                log::warn!("Dropping unserializable message: {}", e);
                false
            }
        }
    }

    /// Publish an already encoded body on the session topic, if connected.
    pub fn send_raw(&mut self, body: &str) -> bool {
        if self.state != ConnectionState::Connected {
            log::debug!("Dropping message while {:?}", self.state);
            return false;
        }
        match self.transport.publish(&self.topic, body) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Publish to {} failed: {}", self.topic, e);
                false
            }
        }
    }

    /// Stop the heartbeat and close the channel. A stopped manager never
    /// reconnects.
    pub fn stop(&mut self) {
        self.heartbeat.stop();
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        self.attempt_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryRelay, MemoryTransport, TransportResult};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const INTERVAL: Duration = DEFAULT_LIVENESS_INTERVAL;

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            endpoint: "memory://relay".to_string(),
            ..ConnectionOptions::default()
        }
    }

    fn manager(
        relay: &MemoryRelay,
        session: &str,
        now: Instant,
    ) -> (ConnectionManager<MemoryTransport>, Rc<RefCell<Vec<String>>>) {
        let inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = inbox.clone();
        let manager = ConnectionManager::create_at(
            move |body: &str| sink.borrow_mut().push(body.to_string()),
            SessionId::new(session),
            relay.transport(),
            options(),
            now,
        );
        (manager, inbox)
    }

    /// Transport whose connection attempts never complete.
    struct HangingTransport {
        connects: Rc<Cell<usize>>,
    }

    impl Transport for HangingTransport {
        fn connect(&mut self, _endpoint: &str) -> TransportResult<()> {
            self.connects.set(self.connects.get() + 1);
            Ok(())
        }
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            false
        }
        fn subscribe(&mut self, _destination: &str) -> TransportResult<()> {
            Ok(())
        }
        fn publish(&mut self, _destination: &str, _body: &str) -> TransportResult<()> {
            Ok(())
        }
        fn poll_events(&mut self) -> Vec<TransportEvent> {
            Vec::new()
        }
    }

    #[test]
    fn test_create_connects_immediately() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);

        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(relay.connect_attempts(), 1);
        assert!(conn.heartbeat().is_running());

        conn.poll_at(now);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.topic(), "/topic/room-9");
        assert_eq!(relay.subscriber_count("/topic/room-9"), 1);
    }

    #[test]
    fn test_check_connection_is_idempotent() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);

        // Attempt in flight: further checks do not start another one.
        conn.check_connection_at(now);
        conn.check_connection_at(now);
        assert_eq!(relay.connect_attempts(), 1);

        conn.poll_at(now);
        conn.check_connection_at(now + INTERVAL);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(relay.connect_attempts(), 1);
    }

    #[test]
    fn test_forwards_topic_messages_verbatim() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, inbox) = manager(&relay, "room-9", now);
        conn.poll_at(now);

        let mut peer = relay.transport();
        peer.connect("memory://relay").unwrap();
        peer.publish("/topic/room-9", "{\"senderId\":\"B2\"}").unwrap();
        peer.publish("/topic/other", "ignored").unwrap();

        conn.poll_at(now);
        assert_eq!(*inbox.borrow(), vec!["{\"senderId\":\"B2\"}".to_string()]);
    }

    #[test]
    fn test_send_dropped_while_disconnected() {
        let relay = MemoryRelay::new();
        relay.set_reachable(false);
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);
        conn.poll_at(now);

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.send_raw("{}"));
        assert!(!conn.send_message(&serde_json::json!({"senderId": "A1"})));
        assert_eq!(relay.publish_count(), 0);
    }

    #[test]
    fn test_send_while_connected_echoes_to_self() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, inbox) = manager(&relay, "room-9", now);
        conn.poll_at(now);

        assert!(conn.send_message(&serde_json::json!({"senderId": "A1"})));
        assert_eq!(relay.publish_count(), 1);
        conn.poll_at(now);
        assert_eq!(inbox.borrow().len(), 1);
    }

    #[test]
    fn test_reconnects_within_one_interval() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);
        conn.poll_at(now);

        relay.drop_connections();
        conn.poll_at(now + Duration::from_millis(10));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.poll_at(now + INTERVAL);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(relay.connect_attempts(), 2);
        assert_eq!(relay.subscriber_count("/topic/room-9"), 1);
    }

    #[test]
    fn test_liveness_detects_silent_loss() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);
        conn.poll_at(now);

        relay.drop_connections();
        // No event drained yet: the check itself notices the dead channel.
        conn.check_connection_at(now);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(relay.connect_attempts(), 2);

        conn.poll_at(now);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_retries_every_interval_without_limit() {
        let relay = MemoryRelay::new();
        relay.set_reachable(false);
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);

        for beat in 1..=5u32 {
            conn.poll_at(now + INTERVAL * beat);
            assert_eq!(conn.state(), ConnectionState::Disconnected);
        }
        assert_eq!(relay.connect_attempts(), 6);

        relay.set_reachable(true);
        conn.poll_at(now + INTERVAL * 6);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_no_check_before_heartbeat_due() {
        let relay = MemoryRelay::new();
        relay.set_reachable(false);
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);
        conn.poll_at(now + INTERVAL / 2);
        assert_eq!(relay.connect_attempts(), 1);
    }

    #[test]
    fn test_stale_attempt_times_out() {
        let connects = Rc::new(Cell::new(0));
        let now = Instant::now();
        let mut conn = ConnectionManager::create_at(
            |_: &str| {},
            SessionId::new("room-9"),
            HangingTransport { connects: connects.clone() },
            options(),
            now,
        );

        conn.poll_at(now + INTERVAL);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(connects.get(), 1);

        conn.poll_at(now + DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(connects.get(), 2);
    }

    #[test]
    fn test_invalid_endpoint_is_retried() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut conn = ConnectionManager::create_at(
            |_: &str| {},
            SessionId::new("room-9"),
            relay.transport(),
            ConnectionOptions {
                endpoint: String::new(),
                ..ConnectionOptions::default()
            },
            now,
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.poll_at(now + INTERVAL);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stop_silences_heartbeat() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "room-9", now);
        conn.poll_at(now);

        conn.stop();
        assert!(!conn.heartbeat().is_running());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.poll_at(now + INTERVAL * 10);
        conn.check_connection_at(now + INTERVAL * 10);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(relay.connect_attempts(), 1);
    }

    #[test]
    fn test_empty_session_uses_degenerate_topic() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let (mut conn, _) = manager(&relay, "", now);
        conn.poll_at(now);
        assert_eq!(conn.topic(), "/topic/");
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_heartbeat_schedule() {
        let now = Instant::now();
        let mut beat = Heartbeat::start(INTERVAL, now);
        assert!(!beat.is_due(now));
        assert!(beat.is_due(now + INTERVAL));
        beat.rearm(now + INTERVAL);
        assert!(!beat.is_due(now + INTERVAL));
        beat.stop();
        assert!(!beat.is_due(now + INTERVAL * 100));
        beat.rearm(now);
        assert!(!beat.is_running());
    }
}
