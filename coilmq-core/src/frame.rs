//! STOMP frame model.
//!
//! A [`StompFrame`] is a command, an ordered set of headers and an opaque
//! body. Frames are produced by [`crate::codec::StompCodec`] on the way in
//! and built with the constructors below on the way out.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use indexmap::IndexMap;

use crate::error::FrameError;

/// Well-known header names.
pub mod header {
    /// Target destination of SEND/SUBSCRIBE/UNSUBSCRIBE/MESSAGE.
    pub const DESTINATION: &str = "destination";
    /// Transaction identifier for BEGIN/COMMIT/ABORT and transactional frames.
    pub const TRANSACTION: &str = "transaction";
    /// Broker-assigned message identifier.
    pub const MESSAGE_ID: &str = "message-id";
    /// Client request for a RECEIPT.
    pub const RECEIPT: &str = "receipt";
    /// Identifier echoed in RECEIPT and ERROR frames.
    pub const RECEIPT_ID: &str = "receipt-id";
    /// Acknowledgement mode requested on SUBSCRIBE.
    pub const ACK: &str = "ack";
    /// Login presented on CONNECT.
    pub const LOGIN: &str = "login";
    /// Passcode presented on CONNECT.
    pub const PASSCODE: &str = "passcode";
    /// Session identifier returned in CONNECTED.
    pub const SESSION: &str = "session";
    /// Short error description carried by ERROR.
    pub const MESSAGE: &str = "message";
    /// Body length in bytes.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Broker identification returned in CONNECTED.
    pub const SERVER: &str = "server";
}

// ============================================================================
// Commands
// ============================================================================

/// A STOMP 1.0 command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Open a session.
    Connect,
    /// STOMP 1.1 synonym of CONNECT.
    Stomp,
    /// Publish a message.
    Send,
    /// Register interest in a destination.
    Subscribe,
    /// Withdraw interest in a destination.
    Unsubscribe,
    /// Open a transaction.
    Begin,
    /// Commit a transaction.
    Commit,
    /// Roll back a transaction.
    Abort,
    /// Acknowledge a client-ack message.
    Ack,
    /// Close the session.
    Disconnect,
    /// Session accepted (server → client).
    Connected,
    /// Delivered message (server → client).
    Message,
    /// Receipt for a client frame (server → client).
    Receipt,
    /// Error report (server → client).
    Error,
}

impl Command {
    /// Every command, in protocol order.
    pub const ALL: [Self; 14] = [
        Self::Connect,
        Self::Stomp,
        Self::Send,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::Begin,
        Self::Commit,
        Self::Abort,
        Self::Ack,
        Self::Disconnect,
        Self::Connected,
        Self::Message,
        Self::Receipt,
        Self::Error,
    ];

    /// Wire representation of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Ack => "ACK",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| FrameError::UnknownCommand(s.to_owned()))
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Ordered STOMP headers.
///
/// Insertion order is preserved for encoding. Inserting an existing name
/// replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(IndexMap<String, String>);

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns `true` if `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Sets `name` to `value`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Sets `name` only if it is not already present.
    ///
    /// Used by the decoder: the first occurrence of a repeated header wins.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_insert_with(|| value.into());
    }

    /// Removes `name`, preserving the order of the remaining headers.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.shift_remove(name)
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command.
    pub command: Command,
    /// Frame headers.
    pub headers: Headers,
    /// Frame body (may be empty).
    pub body: Bytes,
}

impl StompFrame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Builder: adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builder: sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The `destination` header.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header(header::DESTINATION).filter(|d| !d.is_empty())
    }

    /// The `transaction` header.
    #[must_use]
    pub fn transaction(&self) -> Option<&str> {
        self.header(header::TRANSACTION)
    }

    /// The `message-id` header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.header(header::MESSAGE_ID)
    }

    /// The `receipt` header.
    #[must_use]
    pub fn receipt(&self) -> Option<&str> {
        self.header(header::RECEIPT)
    }

    /// Builds an `ERROR` frame with a short `message` header and a detail body.
    #[must_use]
    pub fn error(message: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail: String = detail.into();
        Self::new(Command::Error)
            .with_header(header::MESSAGE, message)
            .with_body(detail)
    }

    /// Builds a `RECEIPT` frame for the given receipt id.
    #[must_use]
    pub fn receipt_for(receipt_id: impl Into<String>) -> Self {
        Self::new(Command::Receipt).with_header(header::RECEIPT_ID, receipt_id)
    }

    /// Builds a `CONNECTED` frame carrying a session id.
    #[must_use]
    pub fn connected(session: impl Into<String>) -> Self {
        Self::new(Command::Connected)
            .with_header(header::SESSION, session)
            .with_header(
                header::SERVER,
                concat!("coilmq/", env!("CARGO_PKG_VERSION")),
            )
    }
}

impl fmt::Display for StompFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        if let Some(dest) = self.destination() {
            write!(f, " {dest}")?;
        }
        if let Some(id) = self.message_id() {
            write!(f, " [{id}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_wire_name() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn command_parsing_is_case_sensitive() {
        assert!(matches!(
            "send".parse::<Command>(),
            Err(FrameError::UnknownCommand(c)) if c == "send"
        ));
    }

    #[test]
    fn header_insert_replaces_in_place() {
        let mut headers: Headers = [("a", "1"), ("b", "2")].into_iter().collect();
        headers.insert("a", "3");
        let order: Vec<_> = headers.iter().collect();
        assert_eq!(order, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn header_insert_if_absent_keeps_first() {
        let mut headers = Headers::new();
        headers.insert_if_absent("destination", "/queue/a");
        headers.insert_if_absent("destination", "/queue/b");
        assert_eq!(headers.get("destination"), Some("/queue/a"));
    }

    #[test]
    fn header_remove_preserves_order() {
        let mut headers: Headers = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        assert_eq!(headers.remove("b").as_deref(), Some("2"));
        let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn empty_destination_is_treated_as_missing() {
        let frame = StompFrame::new(Command::Send).with_header("destination", "");
        assert_eq!(frame.destination(), None);
    }

    #[test]
    fn error_frame_carries_message_and_detail() {
        let frame = StompFrame::error("Missing destination", "SEND requires a destination");
        assert_eq!(frame.command, Command::Error);
        assert_eq!(frame.header("message"), Some("Missing destination"));
        assert_eq!(&frame.body[..], b"SEND requires a destination");
    }

    #[test]
    fn connected_frame_has_session() {
        let frame = StompFrame::connected("abc");
        assert_eq!(frame.header("session"), Some("abc"));
        assert!(frame.header("server").unwrap().starts_with("coilmq/"));
    }

    #[test]
    fn display_is_compact() {
        let frame = StompFrame::new(Command::Message)
            .with_header("destination", "/queue/a")
            .with_header("message-id", "42");
        assert_eq!(frame.to_string(), "MESSAGE /queue/a [42]");
    }
}
