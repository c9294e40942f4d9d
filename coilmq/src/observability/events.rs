//! Structured broker event stream.
//!
//! Discrete, typed events serialized as newline-delimited JSON (JSONL),
//! each carrying a monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection::ConnectionId;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted by the broker.
///
/// Serialized with a `"type"` tag so consumers can dispatch on the kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The listener is bound and accepting connections.
    BrokerStarted {
        /// When the broker started.
        timestamp: DateTime<Utc>,
        /// Bound address.
        listen: String,
        /// Queue store backend name.
        store: String,
    },

    /// The broker has stopped.
    BrokerStopped {
        /// When the broker stopped.
        timestamp: DateTime<Utc>,
        /// Human-readable stop reason.
        reason: String,
    },

    /// A client connected at the TCP level.
    ConnectionOpened {
        /// When the connection was accepted.
        timestamp: DateTime<Utc>,
        /// Broker-assigned connection id.
        connection_id: ConnectionId,
        /// Peer address.
        peer: String,
    },

    /// A client connection ended.
    ConnectionClosed {
        /// When the connection closed.
        timestamp: DateTime<Utc>,
        /// Broker-assigned connection id.
        connection_id: ConnectionId,
        /// Frames received over the connection's lifetime.
        frames_received: u64,
    },

    /// A STOMP session was established by CONNECT.
    SessionEstablished {
        /// When CONNECTED was sent.
        timestamp: DateTime<Utc>,
        /// Broker-assigned connection id.
        connection_id: ConnectionId,
        /// Session id returned to the client.
        session: String,
        /// Login presented, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        login: Option<String>,
    },

    /// A CONNECT was rejected by the authenticator.
    AuthenticationFailed {
        /// When the attempt was rejected.
        timestamp: DateTime<Utc>,
        /// Broker-assigned connection id.
        connection_id: ConnectionId,
        /// Login presented (empty when absent).
        login: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped; a broken event sink never
/// takes the broker down.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone)]
    struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        fn contents(&self) -> String {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn started() -> Event {
        Event::BrokerStarted {
            timestamp: DateTime::parse_from_rfc3339("2025-02-04T10:15:30Z")
                .unwrap()
                .with_timezone(&Utc),
            listen: "127.0.0.1:61613".to_owned(),
            store: "memory".to_owned(),
        }
    }

    #[test]
    fn emitter_writes_flat_jsonl() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(started());

        let parsed: serde_json::Value = serde_json::from_str(tw.contents().trim()).unwrap();
        assert_eq!(parsed["type"], "BrokerStarted");
        assert_eq!(parsed["listen"], "127.0.0.1:61613");
        assert_eq!(parsed["sequence"], 0);
        assert!(parsed.get("event").is_none());
    }

    #[test]
    fn emitter_increments_sequence() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(started());
        emitter.emit(Event::ConnectionOpened {
            timestamp: Utc::now(),
            connection_id: 1,
            peer: "127.0.0.1:5000".to_owned(),
        });
        emitter.emit(Event::BrokerStopped {
            timestamp: Utc::now(),
            reason: "signal".to_owned(),
        });

        assert_eq!(emitter.event_count(), 3);
        let sequences: Vec<u64> = tw
            .contents()
            .lines()
            .map(|l| {
                serde_json::from_str::<serde_json::Value>(l).unwrap()["sequence"]
                    .as_u64()
                    .unwrap()
            })
            .collect();
        assert_eq!(sequences, [0, 1, 2]);
    }

    #[test]
    fn session_login_is_omitted_when_absent() {
        let event = Event::SessionEstablished {
            timestamp: Utc::now(),
            connection_id: 4,
            session: "abc".to_owned(),
            login: None,
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(parsed["type"], "SessionEstablished");
        assert!(parsed.get("login").is_none());
    }

    #[test]
    fn noop_emitter_still_counts() {
        let emitter = EventEmitter::noop();
        emitter.emit(Event::AuthenticationFailed {
            timestamp: Utc::now(),
            connection_id: 2,
            login: "mallory".to_owned(),
        });
        assert_eq!(emitter.event_count(), 1);
    }
}
