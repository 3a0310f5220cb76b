//! # STOMP over WebSocket
//!
//! Frame codec for STOMP 1.2 plus the production [`Connector`] that speaks it
//! over a raw WebSocket.

use std::{collections::VecDeque, fmt, str::FromStr};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header::COOKIE},
        protocol::Message as WsMessage,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::TransportError,
    push::{BrokerConnection, BrokerMessage, Connector},
};

/// STOMP frame commands, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client session opener.
    Connect,
    /// Alternative opener with the same meaning as `CONNECT`.
    Stomp,
    /// Broker accepted the session.
    Connected,
    /// Publish to a destination.
    Send,
    /// Start receiving a destination.
    Subscribe,
    /// Stop receiving a subscription.
    Unsubscribe,
    /// Acknowledge a message.
    Ack,
    /// Reject a message.
    Nack,
    /// Open a transaction.
    Begin,
    /// Commit a transaction.
    Commit,
    /// Roll back a transaction.
    Abort,
    /// Graceful goodbye.
    Disconnect,
    /// Payload delivered on a subscription.
    Message,
    /// Broker confirmation of a frame that asked for one.
    Receipt,
    /// Broker-side failure. The connection ends after it.
    Error,
}

impl Command {
    /// Command name as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim, without escaping.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let command = match value {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(TransportError::Frame(format!("unknown command `{other}`"))),
        };
        Ok(command)
    }
}

/// One STOMP frame. Header order is kept; on repeated names the first wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order, already unescaped.
    pub headers: Vec<(String, String)>,
    /// Frame body, without the trailing NUL.
    pub body: String,
}

impl Frame {
    /// Frame without headers or body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Session opener. Heart-beating is switched off in both directions.
    #[must_use]
    pub fn connect(host: &str) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
    }

    /// Auto-acknowledged subscription to `destination`.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// Release subscription `id`.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// Goodbye asking for `receipt` once the broker is done.
    #[must_use]
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    /// Wire form, NUL terminated. A `content-length` header is added for
    /// non-empty bodies that do not carry one.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
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
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_header(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_header(raw: &str) -> Result<String, TransportError> {
    let mut unescaped = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            unescaped.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('c') => unescaped.push(':'),
            Some(other) => {
                return Err(TransportError::Frame(format!(
                    "undefined escape `\\{other}` in header"
                )));
            }
            None => {
                return Err(TransportError::Frame(
                    "dangling backslash in header".to_string(),
                ));
            }
        }
    }
    Ok(unescaped)
}

/// Incremental decoder. Bytes may arrive split across WebSocket messages;
/// incomplete trailing frames are kept until the rest shows up.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed `chunk` and return every frame it completes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Frame`] on malformed input. The decoder
    /// should be discarded together with its connection afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, TransportError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            let skipped = skip_heartbeats(&self.buffer);
            if skipped > 0 {
                self.buffer.drain(..skipped);
            }
            match parse_frame(&self.buffer)? {
                Some((frame, consumed)) => {
                    self.buffer.drain(..consumed);
                    frames.push(frame);
                }
                None => break,
            }
        }
        Ok(frames)
    }

    /// True when no partial frame is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Upper bound on a single frame declared through `content-length`.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Heart-beats are bare EOLs between frames.
fn skip_heartbeats(buffer: &[u8]) -> usize {
    let mut index = 0;
    while index < buffer.len() {
        match buffer[index] {
            b'\n' => index += 1,
            b'\r' if buffer.get(index + 1) == Some(&b'\n') => index += 2,
            _ => break,
        }
    }
    index
}

fn read_line(buffer: &[u8], from: usize) -> Result<Option<(&str, usize)>, TransportError> {
    let Some(offset) = buffer[from..].iter().position(|byte| *byte == b'\n') else {
        return Ok(None);
    };
    let end = from + offset;
    let line = buffer[from..end]
        .strip_suffix(b"\r")
        .unwrap_or(&buffer[from..end]);
    let line = std::str::from_utf8(line)
        .map_err(|err| TransportError::Frame(format!("frame header is not UTF-8: {err}")))?;
    Ok(Some((line, end + 1)))
}

fn parse_frame(buffer: &[u8]) -> Result<Option<(Frame, usize)>, TransportError> {
    if buffer.is_empty() {
        return Ok(None);
    }
    let Some((command_line, mut position)) = read_line(buffer, 0)? else {
        return Ok(None);
    };
    let command: Command = command_line.parse()?;

    let mut headers = Vec::new();
    loop {
        let Some((line, next)) = read_line(buffer, position)? else {
            return Ok(None);
        };
        position = next;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Frame(format!("header line without colon: `{line}`")))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let declared_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value.trim().parse::<usize>().map_err(|_| {
                TransportError::Frame(format!("invalid content-length `{value}`"))
            })
        })
        .transpose()?;

    let body_end = if let Some(length) = declared_length {
        let end = position
            .checked_add(length)
            .filter(|end| *end < MAX_FRAME_BYTES)
            .ok_or_else(|| TransportError::Frame("content-length out of range".to_string()))?;
        if buffer.len() <= end {
            return Ok(None);
        }
        if buffer[end] != 0 {
            return Err(TransportError::Frame(
                "body longer than its content-length".to_string(),
            ));
        }
        end
    } else {
        match buffer[position..].iter().position(|byte| *byte == 0) {
            Some(offset) => position + offset,
            None => return Ok(None),
        }
    };

    let body = String::from_utf8(buffer[position..body_end].to_vec())
        .map_err(|err| TransportError::Frame(format!("frame body is not UTF-8: {err}")))?;

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    )))
}

fn broker_error(frame: &Frame) -> TransportError {
    TransportError::Broker {
        message: frame
            .get("message")
            .unwrap_or("broker reported an error")
            .to_string(),
        details: (!frame.body.is_empty()).then(|| frame.body.clone()),
    }
}

/// Opens STOMP sessions over a plain WebSocket.
#[derive(Debug, Clone)]
pub struct StompConnector {
    url: Url,
    cookie: Option<String>,
}

impl StompConnector {
    /// Connector for the broker WebSocket at `url`.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self { url, cookie: None }
    }

    /// Send `cookie` (a `Cookie` header value) with the WebSocket upgrade so
    /// the broker sees the same session as the HTTP client.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    fn upgrade_failed(&self, message: impl fmt::Display) -> TransportError {
        TransportError::Connect {
            url: self.url.to_string(),
            message: message.to_string(),
        }
    }

    /// Broker endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| self.upgrade_failed(err))?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie).map_err(|err| self.upgrade_failed(err))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (socket, _) = connect_async(request)
            .await
            .map_err(|err| self.upgrade_failed(err))?;
        let mut connection = StompConnection {
            socket,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
        };
        let host = self.url.host_str().unwrap_or("localhost");
        connection.send(&Frame::connect(host)).await?;

        let connected = connection.next_frame().await?;
        match connected.command {
            Command::Connected => {
                debug!(
                    version = connected.get("version").unwrap_or("1.2"),
                    server = connected.get("server").unwrap_or("unknown"),
                    "STOMP session established"
                );
                Ok(Box::new(connection))
            }
            Command::Error => Err(broker_error(&connected)),
            other => Err(TransportError::Frame(format!(
                "expected CONNECTED, broker sent {other}"
            ))),
        }
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

struct StompConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
}

impl StompConnection {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.socket.send(WsMessage::Text(frame.encode())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let chunk = match self.socket.next().await {
                Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                Some(Ok(WsMessage::Binary(bytes))) => bytes,
                Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            };
            self.pending.extend(self.decoder.push(&chunk)?);
        }
    }
}

#[async_trait]
impl BrokerConnection for StompConnection {
    async fn subscribe(&mut self, id: &str, destination: &str) -> Result<(), TransportError> {
        self.send(&Frame::subscribe(id, destination)).await
    }

    async fn next_message(&mut self) -> Result<BrokerMessage, TransportError> {
        loop {
            let frame = self.next_frame().await?;
            match frame.command {
                Command::Message => {
                    return Ok(BrokerMessage {
                        subscription: frame.get("subscription").map(str::to_string),
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        body: frame.body,
                    });
                }
                Command::Error => return Err(broker_error(&frame)),
                other => debug!(command = %other, "ignoring broker frame"),
            }
        }
    }

    async fn close(&mut self, subscription_ids: &[String]) {
        for id in subscription_ids {
            if let Err(err) = self.send(&Frame::unsubscribe(id)).await {
                debug!(error = %err, subscription = %id, "unsubscribe not delivered");
                return;
            }
        }
        if let Err(err) = self.send(&Frame::disconnect("disconnect-0")).await {
            debug!(error = %err, "disconnect not delivered");
        }
        if let Err(err) = self.socket.close(None).await {
            warn!(error = %err, "websocket close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &str) -> Vec<Frame> {
        FrameDecoder::new().push(input.as_bytes()).unwrap()
    }

    #[test]
    fn connect_frame_layout() {
        let wire = Frame::connect("desk.test").encode();
        assert_eq!(
            wire,
            "CONNECT\naccept-version:1.2\nhost:desk.test\nheart-beat:0,0\n\n\0"
        );
    }

    #[test]
    fn subscribe_frame_escapes_header_values() {
        let wire = Frame::subscribe("sub-0", "/topic/a:b").encode();
        assert!(wire.starts_with("SUBSCRIBE\nid:sub-0\ndestination:/topic/a\\cb\n"));
        let decoded = decode_all(&wire);
        assert_eq!(decoded[0].get("destination"), Some("/topic/a:b"));
    }

    #[test]
    fn decodes_message_frame_without_content_length() {
        let frames = decode_all(
            "MESSAGE\nsubscription:sub-1\ndestination:/topic/tickets/new\nmessage-id:7\n\n{\"id\":4}\0",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("subscription"), Some("sub-1"));
        assert_eq!(frames[0].body, "{\"id\":4}");
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let body = "a\0b";
        let wire = format!("MESSAGE\ndestination:/x\ncontent-length:{}\n\n{body}\0", body.len());
        let frames = decode_all(&wire);
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn content_length_counts_utf8_bytes() {
        let body = "Привет";
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/echo")
            .body(body);
        let wire = frame.encode();
        assert!(wire.contains(&format!("content-length:{}", body.len())));
        assert_eq!(decode_all(&wire)[0].body, body);
    }

    #[test]
    fn heartbeats_between_frames_are_skipped() {
        let frames = decode_all("\n\r\nRECEIPT\nreceipt-id:1\n\n\0\n\nRECEIPT\nreceipt-id:2\n\n\0\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].get("receipt-id"), Some("2"));
    }

    #[test]
    fn split_frames_wait_for_the_rest() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"MESSAGE\ndestination:/topic/tick").unwrap().is_empty());
        assert!(decoder.push(b"ets/9\n\n{\"id\"").unwrap().is_empty());
        let frames = decoder.push(b":1}\0").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get("destination"), Some("/topic/tickets/9"));
        assert!(decoder.is_idle());
    }

    #[test]
    fn repeated_header_keeps_first_value() {
        let frames = decode_all("MESSAGE\ndestination:/first\ndestination:/second\n\n\0");
        assert_eq!(frames[0].get("destination"), Some("/first"));
    }

    #[test]
    fn connected_headers_are_not_unescaped() {
        let frames = decode_all("CONNECTED\nversion:1.2\nserver:broker\\c1\n\n\0");
        assert_eq!(frames[0].get("server"), Some("broker\\c1"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(FrameDecoder::new().push(b"BOGUS\n\n\0").is_err());
        assert!(
            FrameDecoder::new()
                .push(b"MESSAGE\ndestination:/a\\t\n\n\0")
                .is_err()
        );
        assert!(
            FrameDecoder::new()
                .push(b"MESSAGE\ncontent-length:1\n\nabc\0")
                .is_err()
        );
    }

    #[test]
    fn oversized_content_length_is_rejected() {
        let err = FrameDecoder::new()
            .push(b"MESSAGE\ncontent-length:18446744073709551615\n\nx\0")
            .unwrap_err();
        assert!(matches!(err, TransportError::Frame(ref message) if message.contains("out of range")));

        let err = FrameDecoder::new()
            .push(b"MESSAGE\ncontent-length:999999999999\n\nx\0")
            .unwrap_err();
        assert!(matches!(err, TransportError::Frame(_)));
    }

    #[test]
    fn error_frame_maps_to_broker_error() {
        let frame = decode_all("ERROR\nmessage:Access denied\n\nsubscription refused\0").remove(0);
        match broker_error(&frame) {
            TransportError::Broker { message, details } => {
                assert_eq!(message, "Access denied");
                assert_eq!(details.as_deref(), Some("subscription refused"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
