//! STOMP 1.2 frame codec.
//!
//! One frame per WebSocket text message:
//! ```text
//! COMMAND
//! header:value
//!
//! body^@
//! ```
//! A message consisting only of line endings is a heart-beat.

use std::fmt;
use thiserror::Error;

/// STOMP version spoken by the client.
pub const STOMP_VERSION: &str = "1.2";

/// Frame parse errors.
#[derive(Debug, Error, PartialEq)]
pub enum StompError {
    #[error("Frame has no command line")]
    MissingCommand,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),
    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),
    #[error("Frame is not NULL-terminated")]
    Unterminated,
}

/// Frame commands used by the sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self, StompError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A STOMP frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// CONNECT frame. `outgoing_ms` is how often this client promises to
    /// send heart-beats; no incoming heart-beats are requested.
    pub fn connect(host: &str, outgoing_ms: u64) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},0", outgoing_ms))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn send(destination: &str, body: &str) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json;charset=UTF-8")
            .header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Serialize to wire text, including the trailing NULL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse wire text. Returns `Ok(None)` for a heart-beat.
    pub fn parse(text: &str) -> Result<Option<Frame>, StompError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        // Headers end at the first blank line, whichever line ending it uses.
        let separator = [("\n\n", 2), ("\r\n\r\n", 4)]
            .into_iter()
            .filter_map(|(sep, len)| text.find(sep).map(|i| (i, len)))
            .min_by_key(|&(i, _)| i);
        let (head, rest) = match separator {
            Some((i, len)) => (&text[..i], &text[i + len..]),
            None => (text.trim_end_matches('\0'), "\0"),
        };

        let mut lines = head.lines();
        let command_line = lines.next().ok_or(StompError::MissingCommand)?;
        let command = Command::parse(command_line.trim_end_matches('\r'))?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame_end = rest.find('\0').ok_or(StompError::Unterminated)?;
        let body = rest[..frame_end].to_string();

        Ok(Some(Frame { command, headers, body }))
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}
