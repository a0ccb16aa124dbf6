//! STOMP-over-WebSocket client for native platforms.
//!
//! Uses a background thread for non-blocking operation: the caller's event
//! loop sends commands over a channel and drains [`TransportEvent`]s with
//! `poll_events`.

use super::stomp::{Command, Frame};
use super::{Transport, TransportError, TransportEvent, TransportResult};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

/// Relay endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/portfolio/websocket";

/// WebSocket sub-protocol negotiated during the handshake.
pub const STOMP_SUBPROTOCOL: &str = "v12.stomp";

/// Default interval between outgoing STOMP heart-beats.
const DEFAULT_OUTGOING_HEARTBEAT: Duration = Duration::from_millis(1000);

/// Socket read timeout; bounds how long the worker waits before checking
/// for commands and heart-beat deadlines.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Commands sent to the socket thread.
enum WsCommand {
    Subscribe { id: String, destination: String },
    Send { destination: String, body: String },
    Close,
}

/// Truncate long payloads for log lines.
pub(crate) fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// STOMP 1.2 client over a tungstenite WebSocket.
pub struct StompWebSocket {
    outgoing_heartbeat: Duration,
    connected: Arc<AtomicBool>,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<TransportEvent>>,
    next_subscription: usize,
    _thread: Option<JoinHandle<()>>,
}

impl StompWebSocket {
    /// Create a disconnected client.
    pub fn new() -> Self {
        Self::with_heartbeat(DEFAULT_OUTGOING_HEARTBEAT)
    }

    /// Create a disconnected client that sends heart-beats every `outgoing`.
    pub fn with_heartbeat(outgoing: Duration) -> Self {
        Self {
            outgoing_heartbeat: outgoing,
            connected: Arc::new(AtomicBool::new(false)),
            cmd_tx: None,
            event_rx: None,
            next_subscription: 0,
            _thread: None,
        }
    }

    fn command(&self, cmd: WsCommand) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        match self.cmd_tx {
            Some(ref tx) => tx.send(cmd).map_err(|_| TransportError::Closed),
            None => Err(TransportError::NotConnected),
        }
    }
}

impl Default for StompWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StompWebSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Check the endpoint and build the handshake request.
fn handshake_request(endpoint: &str) -> TransportResult<(tungstenite::handshake::client::Request, String)> {
    let url = Url::parse(endpoint)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    match url.scheme() {
        "ws" => {}
        // tungstenite is built without a TLS backend.
        "wss" => {
            return Err(TransportError::InvalidEndpoint(format!(
                "TLS endpoints are not supported: {}",
                endpoint
            )));
        }
        scheme => {
            return Err(TransportError::InvalidEndpoint(format!(
                "Invalid WebSocket URL scheme: {}",
                scheme
            )));
        }
    }
    let host = url.host_str().unwrap_or("localhost").to_string();

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(STOMP_SUBPROTOCOL),
    );
    Ok((request, host))
}

impl Transport for StompWebSocket {
    fn connect(&mut self, endpoint: &str) -> TransportResult<()> {
        // Any previous socket is stale once a new attempt starts.
        self.disconnect();

        let (request, host) = handshake_request(endpoint)?;
        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<TransportEvent>();
        let connected = self.connected.clone();
        let heartbeat = self.outgoing_heartbeat;
        let endpoint = endpoint.to_string();

        let handle = thread::spawn(move || {
            log::info!("STOMP thread: connecting to {}", endpoint);
            let mut socket = match tungstenite::connect(request) {
                Ok((socket, response)) => {
                    log::info!("WebSocket connected, status: {}", response.status());
                    socket
                }
                Err(e) => {
                    log::warn!("WebSocket connection failed: {}", e);
                    let _ = event_tx.send(TransportEvent::Error {
                        message: format!("Connection failed: {}", e),
                    });
                    return;
                }
            };

            if let MaybeTlsStream::Plain(tcp) = socket.get_mut() {
                let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
            }

            match stomp_handshake(&mut socket, &host, heartbeat) {
                Ok(()) => {
                    connected.store(true, Ordering::SeqCst);
                    let _ = event_tx.send(TransportEvent::Connected);
                }
                Err(message) => {
                    log::warn!("STOMP handshake failed: {}", message);
                    let _ = socket.close(None);
                    let _ = event_tx.send(TransportEvent::Error { message });
                    return;
                }
            }

            run_session(&mut socket, &cmd_rx, &event_tx, heartbeat);

            connected.store(false, Ordering::SeqCst);
            log::info!("STOMP thread exiting");
            let _ = event_tx.send(TransportEvent::Disconnected);
        });

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.connected.store(false, Ordering::SeqCst);
        // A fresh flag so a still-exiting worker cannot flip the next one.
        self.connected = Arc::new(AtomicBool::new(false));
        self.next_subscription = 0;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self, destination: &str) -> TransportResult<()> {
        let id = format!("sub-{}", self.next_subscription);
        self.command(WsCommand::Subscribe {
            id,
            destination: destination.to_string(),
        })?;
        self.next_subscription += 1;
        Ok(())
    }

    fn publish(&mut self, destination: &str, body: &str) -> TransportResult<()> {
        self.command(WsCommand::Send {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
    }
}

/// Send CONNECT and wait for CONNECTED.
fn stomp_handshake(socket: &mut Socket, host: &str, heartbeat: Duration) -> Result<(), String> {
    let connect = Frame::connect(host, heartbeat.as_millis() as u64);
    socket
        .send(Message::Text(connect.encode()))
        .map_err(|e| format!("CONNECT send failed: {}", e))?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        match socket.read() {
            Ok(Message::Text(text)) => match Frame::parse(&text) {
                Ok(Some(frame)) if frame.command == Command::Connected => {
                    log::debug!(
                        "STOMP connected, version {}",
                        frame.get("version").unwrap_or("?")
                    );
                    return Ok(());
                }
                Ok(Some(frame)) if frame.command == Command::Error => {
                    return Err(format!(
                        "Relay refused connection: {}",
                        frame.get("message").unwrap_or(&frame.body)
                    ));
                }
                Ok(_) => {}
                Err(e) => return Err(format!("Bad frame during handshake: {}", e)),
            },
            Ok(Message::Close(_)) => return Err("Relay closed during handshake".to_string()),
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(format!("Read failed during handshake: {}", e)),
        }
    }
    Err("Timed out waiting for CONNECTED".to_string())
}

/// Pump commands, heart-beats and inbound frames until the socket closes.
fn run_session(
    socket: &mut Socket,
    cmd_rx: &Receiver<WsCommand>,
    event_tx: &Sender<TransportEvent>,
    heartbeat: Duration,
) {
    let mut last_write = Instant::now();

    loop {
        // Check for commands (non-blocking)
        loop {
            let frame = match cmd_rx.try_recv() {
                Ok(WsCommand::Subscribe { id, destination }) => {
                    log::debug!("STOMP subscribe {} -> {}", id, destination);
                    Frame::subscribe(&id, &destination)
                }
                Ok(WsCommand::Send { destination, body }) => {
                    log::debug!("STOMP send to {}: {}", destination, preview(&body));
                    Frame::send(&destination, &body)
                }
                Ok(WsCommand::Close) => {
                    log::info!("STOMP close requested");
                    let _ = socket.send(Message::Text(Frame::disconnect().encode()));
                    let _ = socket.close(None);
                    return;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("STOMP command channel disconnected");
                    let _ = socket.close(None);
                    return;
                }
                Err(TryRecvError::Empty) => break,
            };
            if let Err(e) = socket.send(Message::Text(frame.encode())) {
                log::error!("WebSocket send error: {}", e);
                return;
            }
            last_write = Instant::now();
        }

        if !heartbeat.is_zero() && last_write.elapsed() >= heartbeat {
            if let Err(e) = socket.send(Message::Text("\n".to_string())) {
                log::error!("Heart-beat send error: {}", e);
                return;
            }
            last_write = Instant::now();
        }

        // Check for incoming frames (with timeout)
        match socket.read() {
            Ok(Message::Text(text)) => match Frame::parse(&text) {
                Ok(Some(frame)) => match frame.command {
                    Command::Message => {
                        let destination = frame.get("destination").unwrap_or_default().to_string();
                        log::debug!("STOMP message on {}: {}", destination, preview(&frame.body));
                        let _ = event_tx.send(TransportEvent::Message {
                            destination,
                            body: frame.body,
                        });
                    }
                    Command::Error => {
                        let message = frame.get("message").unwrap_or(&frame.body).to_string();
                        log::error!("STOMP error frame: {}", message);
                        let _ = event_tx.send(TransportEvent::Error { message });
                        return;
                    }
                    other => log::debug!("Ignoring STOMP {} frame", other),
                },
                Ok(None) => {} // heart-beat
                Err(e) => log::warn!("Failed to parse STOMP frame: {}", e),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("WebSocket received close frame");
                return;
            }
            Ok(_) => {} // Ignore binary, pong
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("WebSocket read error: {}", e);
                return;
            }
        }
    }
}
