//! Client connection handles.
//!
//! Managers never write to sockets directly. They hold a
//! [`Connection`] handle and call [`StompConnection::send_frame`], which for
//! TCP clients pushes the frame onto the connection's outbound channel. The
//! per-connection writer task drains that channel, so delivering a frame
//! never blocks while a manager lock is held.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use coilmq_core::StompFrame;
use tokio::sync::mpsc;

/// Numeric connection identifier, unique for the lifetime of the broker.
pub type ConnectionId = u64;

/// Shared connection handle.
pub type Connection = Arc<dyn StompConnection>;

/// Delivery failed because the connection is gone.
///
/// Carries the undelivered frame back so the caller can requeue it.
#[derive(Debug)]
pub struct ConnectionClosed(pub StompFrame);

/// A client connection as seen by the routing layer.
pub trait StompConnection: Send + Sync + fmt::Debug {
    /// Broker-unique identifier.
    fn id(&self) -> ConnectionId;

    /// Queues a frame for delivery to the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionClosed`] with the frame if the client is gone.
    fn send_frame(&self, frame: StompFrame) -> Result<(), ConnectionClosed>;

    /// Whether the client subscribed with `ack: client`.
    fn reliable_subscriber(&self) -> bool;

    /// Marks the client as a reliable (client-ack) subscriber or not.
    fn set_reliable_subscriber(&self, reliable: bool);
}

/// Connection backed by an unbounded channel to a writer task.
pub struct ChannelConnection {
    id: ConnectionId,
    // std::sync::Mutex: only held to clone or take the sender, never across .await.
    tx: Mutex<Option<mpsc::UnboundedSender<StompFrame>>>,
    reliable: AtomicBool,
}

impl ChannelConnection {
    /// Creates a connection and the receiver its writer task drains.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Arc<Self>, mpsc::UnboundedReceiver<StompFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id,
            tx: Mutex::new(Some(tx)),
            reliable: AtomicBool::new(false),
        });
        (conn, rx)
    }

    /// Stops accepting frames.
    ///
    /// Frames already queued are still drained by the writer; once every
    /// queued frame is written the writer's receiver yields `None`.
    pub fn close(&self) {
        self.tx.lock().expect("connection sender mutex poisoned").take();
    }
}

impl fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("id", &self.id)
            .field("reliable", &self.reliable_subscriber())
            .finish_non_exhaustive()
    }
}

impl StompConnection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send_frame(&self, frame: StompFrame) -> Result<(), ConnectionClosed> {
        let guard = self.tx.lock().expect("connection sender mutex poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(frame).map_err(|e| ConnectionClosed(e.0)),
            None => Err(ConnectionClosed(frame)),
        }
    }

    fn reliable_subscriber(&self) -> bool {
        self.reliable.load(Ordering::Acquire)
    }

    fn set_reliable_subscriber(&self, reliable: bool) {
        self.reliable.store(reliable, Ordering::Release);
    }
}
