//! STOMP TCP server.
//!
//! Accepts client connections and runs one task per connection. Each task
//! reads frames through [`StompCodec`] and feeds them to a
//! [`StompEngine`]; a companion writer task drains the connection's
//! outbound channel into the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use coilmq_core::config::ServerSettings;
use coilmq_core::{DEFAULT_MAX_FRAME_SIZE, StompCodec, StompFrame};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::connection::{ChannelConnection, Connection, ConnectionId, StompConnection};
use crate::engine::StompEngine;
use crate::error::{ConfigError, FrameError, ServerError};
use crate::observability::Event;
use crate::observability::metrics;

/// How long shutdown waits for connection tasks to finish.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Options
// ============================================================================

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Largest frame a client may send.
    pub max_frame_size: usize,
    /// Connections beyond this count are turned away.
    pub max_connections: Option<usize>,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: None,
            idle_timeout: None,
        }
    }
}

impl ServerOptions {
    /// Builds options from the `server` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `idle_timeout` is not a
    /// valid duration.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self, ConfigError> {
        let idle_timeout = settings
            .idle_timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidValue {
                    field: "server.idle_timeout".to_string(),
                    value: raw.to_string(),
                    expected: format!("a duration such as \"5m\" ({e})"),
                })
            })
            .transpose()?;
        Ok(Self {
            max_frame_size: settings.max_frame_size,
            max_connections: settings.max_connections,
            idle_timeout,
        })
    }
}

// ============================================================================
// Connection Tracking
// ============================================================================

/// Bookkeeping for an accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Peer address.
    pub peer: String,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
}

type Registry = Arc<DashMap<ConnectionId, ConnectionInfo>>;

/// Removes a connection from the registry on drop, on every exit path.
struct ConnectionGuard {
    connections: Registry,
    connection_id: ConnectionId,
}

impl ConnectionGuard {
    fn register(connections: &Registry, connection_id: ConnectionId, peer: &str) -> Self {
        connections.insert(
            connection_id,
            ConnectionInfo {
                peer: peer.to_string(),
                connected_at: Utc::now(),
            },
        );
        metrics::set_connections_active(connections.len());
        Self {
            connections: Arc::clone(connections),
            connection_id,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some((id, info)) = self.connections.remove(&self.connection_id) {
            let duration_ms = (Utc::now() - info.connected_at).num_milliseconds();
            debug!(connection = id, peer = %info.peer, duration_ms, "connection released");
        }
        metrics::set_connections_active(self.connections.len());
    }
}

// ============================================================================
// Server
// ============================================================================

/// A bound STOMP listener.
#[derive(Debug)]
pub struct StompServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    broker: Arc<Broker>,
    options: Arc<ServerOptions>,
    connections: Registry,
    next_connection_id: AtomicU64,
    cancel: CancellationToken,
}

impl StompServer {
    /// Binds the listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        broker: Arc<Broker>,
        options: ServerOptions,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        Ok(Self {
            listener,
            local_addr,
            broker,
            options: Arc::new(options),
            connections: Arc::new(DashMap::new()),
            next_connection_id: AtomicU64::new(1),
            cancel,
        })
    }

    /// The bound address (useful when binding port 0).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accepts connections until the cancellation token fires.
    ///
    /// On shutdown every connection is unbound (requeueing any frame it had
    /// not acknowledged) and the server waits up to [`SHUTDOWN_GRACE`] for
    /// connection tasks before aborting the rest. Closing the store is left
    /// to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if accepting fails fatally.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "listening");
        let mut tasks = JoinSet::new();

        let result = loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!(connections = self.connection_count(), "shutting down listener");
                    break Ok(());
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(&mut tasks, stream, peer),
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!(error = %e, "accept failed");
                    }
                    Err(e) => break Err(ServerError::Listener(e)),
                },
            }
        };

        self.cancel.cancel();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "connection tasks still running, aborting");
            tasks.shutdown().await;
        }
        metrics::set_connections_active(0);
        result
    }

    fn spawn_connection(&self, tasks: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let peer = peer.to_string();

        if let Some(max) = self.options.max_connections
            && self.connections.len() >= max
        {
            warn!(connection = id, %peer, max, "connection limit reached, rejecting");
            metrics::record_error("connection_limit");
            tasks.spawn(reject(stream, max));
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = id, error = %e, "failed to set TCP_NODELAY");
        }
        let guard = ConnectionGuard::register(&self.connections, id, &peer);
        let broker = Arc::clone(&self.broker);
        let options = Arc::clone(&self.options);
        let cancel = self.cancel.child_token();
        tasks.spawn(async move {
            let _guard = guard;
            serve_connection(stream, id, &peer, broker, &options, cancel).await;
        });
    }
}

/// Errors after which the accept loop keeps going.
fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

async fn reject(mut stream: TcpStream, max: usize) {
    let frame = StompFrame::error(
        "Too many connections",
        format!("the broker accepts at most {max} connections\n"),
    );
    if let Err(e) = stream.write_all(&frame.to_bytes()).await {
        debug!(error = %e, "failed to send rejection");
    }
    let _ = stream.shutdown().await;
}

// ============================================================================
// Connection Loop
// ============================================================================

enum Inbound {
    Frame(StompFrame),
    Closed,
    Idle,
    Invalid(FrameError),
}

/// Runs the STOMP session for one client stream until it disconnects, sends
/// an undecodable frame, idles out or `cancel` fires.
///
/// Returns the number of frames received.
pub async fn serve_connection<S>(
    stream: S,
    id: ConnectionId,
    peer: &str,
    broker: Arc<Broker>,
    options: &ServerOptions,
    cancel: CancellationToken,
) -> u64
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    debug!(connection = id, %peer, "connection opened");
    broker.events.emit(Event::ConnectionOpened {
        timestamp: Utc::now(),
        connection_id: id,
        peer: peer.to_string(),
    });

    let (mut sink, mut frames) =
        Framed::new(stream, StompCodec::new(options.max_frame_size)).split();
    let (connection, mut outbound) = ChannelConnection::new(id);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(frame).await {
                debug!(connection = id, error = %e, "write failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    let mut engine = StompEngine::new(Arc::clone(&connection) as Connection, Arc::clone(&broker));
    let mut received = 0_u64;

    loop {
        let inbound = tokio::select! {
            () = cancel.cancelled() => break,
            inbound = read_frame(&mut frames, options.idle_timeout) => inbound,
        };
        match inbound {
            Inbound::Frame(frame) => {
                received += 1;
                if !engine.process_frame(frame) {
                    break;
                }
            }
            Inbound::Closed => break,
            Inbound::Idle => {
                info!(connection = id, "closing idle connection");
                let _ = connection.send_frame(StompFrame::error(
                    "Idle timeout",
                    "no frames received within the idle timeout\n",
                ));
                break;
            }
            Inbound::Invalid(e) => {
                warn!(connection = id, error = %e, "undecodable frame, closing connection");
                metrics::record_error(e.category());
                let _ = connection.send_frame(StompFrame::error(e.to_string(), format!("{e}\n")));
                break;
            }
        }
    }

    engine.unbind();
    connection.close();
    if writer.await.is_err() {
        debug!(connection = id, "writer task aborted");
    }

    debug!(connection = id, frames = received, "connection closed");
    broker.events.emit(Event::ConnectionClosed {
        timestamp: Utc::now(),
        connection_id: id,
        frames_received: received,
    });
    received
}

async fn read_frame<St>(frames: &mut St, idle_timeout: Option<Duration>) -> Inbound
where
    St: futures_util::Stream<Item = Result<StompFrame, FrameError>> + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::Idle,
        },
        None => frames.next().await,
    };
    match next {
        Some(Ok(frame)) => Inbound::Frame(frame),
        None => Inbound::Closed,
        Some(Err(FrameError::Io(e))) => {
            debug!(error = %e, "read failed");
            Inbound::Closed
        }
        Some(Err(e)) => Inbound::Invalid(e),
    }
}
