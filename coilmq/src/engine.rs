//! STOMP protocol engine.
//!
//! A [`StompEngine`] holds the protocol state of one client connection and
//! turns each frame the client sends into calls on the shared
//! [`Broker`]. It never touches the network: replies go through the
//! connection handle, which makes the engine easy to drive from tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use coilmq_core::frame::header;
use coilmq_core::{Command, StompFrame};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::observability::Event;
use crate::observability::metrics;

/// Destination prefix routed to the queue manager.
pub const QUEUE_PREFIX: &str = "/queue/";

/// Per-connection STOMP state machine.
#[derive(Debug)]
pub struct StompEngine {
    connection: Connection,
    broker: Arc<Broker>,
    connected: bool,
    session: Option<String>,
    transactions: HashMap<String, Vec<StompFrame>>,
}

impl StompEngine {
    /// Creates an engine for a freshly accepted connection.
    #[must_use]
    pub fn new(connection: Connection, broker: Arc<Broker>) -> Self {
        Self {
            connection,
            broker,
            connected: false,
            session: None,
            transactions: HashMap::new(),
        }
    }

    /// Whether CONNECT has succeeded on this connection.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// The session id handed out on CONNECT.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Open transactions and the SEND frames buffered in each.
    #[must_use]
    pub const fn transactions(&self) -> &HashMap<String, Vec<StompFrame>> {
        &self.transactions
    }

    /// Handles one client frame.
    ///
    /// Failures are reported to the client as an `ERROR` frame and do not end
    /// the session. Returns `false` once the client has sent DISCONNECT and
    /// the connection should be closed.
    pub fn process_frame(&mut self, frame: StompFrame) -> bool {
        let command = frame.command;
        let receipt = frame.receipt().map(str::to_owned);
        let summary = frame.to_string();
        metrics::record_frame(command);
        debug!(connection = self.connection.id(), frame = %summary, "processing frame");

        match self.dispatch(frame) {
            Ok(()) => {
                if let Some(receipt) = receipt {
                    self.reply(StompFrame::receipt_for(receipt));
                }
            }
            Err(e) => {
                warn!(connection = self.connection.id(), error = %e, frame = %summary, "frame rejected");
                metrics::record_error(e.category());
                let mut error = StompFrame::error(
                    e.to_string(),
                    format!("{e}\nwhile processing {summary}\n"),
                );
                if let Some(receipt) = receipt {
                    error.headers.insert(header::RECEIPT_ID, receipt);
                }
                self.reply(error);
            }
        }

        command != Command::Disconnect
    }

    /// Detaches the connection from the broker.
    ///
    /// Open transactions are aborted and the connection leaves every queue
    /// and topic; its unacknowledged queue frame is requeued. Safe to call
    /// more than once.
    pub fn unbind(&mut self) {
        debug!(connection = self.connection.id(), "unbinding connection");
        self.transactions.clear();
        if let Err(e) = self.broker.queues.disconnect(&self.connection) {
            warn!(connection = self.connection.id(), error = %e, "failed to release queue state");
        }
        self.broker.topics.disconnect(&self.connection);
        self.connected = false;
    }

    fn reply(&self, frame: StompFrame) {
        if self.connection.send_frame(frame).is_err() {
            debug!(connection = self.connection.id(), "reply dropped, connection closed");
        }
    }

    fn dispatch(&mut self, frame: StompFrame) -> Result<(), ProtocolError> {
        if !self.connected && !matches!(frame.command, Command::Connect | Command::Stomp) {
            return Err(ProtocolError::NotConnected);
        }
        match frame.command {
            Command::Connect | Command::Stomp => self.connect(&frame),
            Command::Send => self.send(frame),
            Command::Subscribe => self.subscribe(&frame),
            Command::Unsubscribe => self.unsubscribe(&frame),
            Command::Begin => self.begin(&frame),
            Command::Commit => self.commit(&frame),
            Command::Abort => self.abort(&frame),
            Command::Ack => self.ack(&frame),
            Command::Disconnect => {
                self.unbind();
                Ok(())
            }
            Command::Connected | Command::Message | Command::Receipt | Command::Error => Err(
                ProtocolError::InvalidCommand(frame.command.as_str().to_string()),
            ),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn connect(&mut self, frame: &StompFrame) -> Result<(), ProtocolError> {
        if self.connected {
            return Err(ProtocolError::AlreadyConnected);
        }
        let login = frame.header(header::LOGIN);
        if let Some(ref authenticator) = self.broker.authenticator {
            let passcode = frame.header(header::PASSCODE).unwrap_or_default();
            if !authenticator.authenticate(login.unwrap_or_default(), passcode) {
                let login = login.unwrap_or_default().to_string();
                metrics::record_auth_failure();
                self.broker.events.emit(Event::AuthenticationFailed {
                    timestamp: Utc::now(),
                    connection_id: self.connection.id(),
                    login: login.clone(),
                });
                return Err(ProtocolError::AuthenticationFailed { login });
            }
        }

        let session = uuid::Uuid::new_v4().to_string();
        info!(connection = self.connection.id(), session, login, "session established");
        self.broker.events.emit(Event::SessionEstablished {
            timestamp: Utc::now(),
            connection_id: self.connection.id(),
            session: session.clone(),
            login: login.map(str::to_owned),
        });
        self.connected = true;
        self.session = Some(session.clone());
        self.reply(StompFrame::connected(session));
        Ok(())
    }

    fn send(&mut self, mut frame: StompFrame) -> Result<(), ProtocolError> {
        if frame.destination().is_none() {
            return Err(missing("SEND", header::DESTINATION));
        }
        if let Some(transaction) = frame.transaction() {
            let buffered = self
                .transactions
                .get_mut(transaction)
                .ok_or_else(|| ProtocolError::InvalidTransaction(transaction.to_string()))?;
            frame.headers.remove(header::TRANSACTION);
            buffered.push(frame);
            return Ok(());
        }
        self.route(frame)
    }

    fn route(&self, frame: StompFrame) -> Result<(), ProtocolError> {
        if frame.destination().is_some_and(is_queue) {
            self.broker.queues.send(frame)?;
        } else {
            self.broker.topics.send(frame)?;
        }
        Ok(())
    }

    fn subscribe(&self, frame: &StompFrame) -> Result<(), ProtocolError> {
        let destination = frame
            .destination()
            .ok_or_else(|| missing("SUBSCRIBE", header::DESTINATION))?;
        if frame
            .header(header::ACK)
            .is_some_and(|ack| ack.eq_ignore_ascii_case("client"))
        {
            self.connection.set_reliable_subscriber(true);
        }
        if is_queue(destination) {
            self.broker.queues.subscribe(&self.connection, destination)?;
        } else {
            self.broker.topics.subscribe(&self.connection, destination);
        }
        Ok(())
    }

    fn unsubscribe(&self, frame: &StompFrame) -> Result<(), ProtocolError> {
        let destination = frame
            .destination()
            .ok_or_else(|| missing("UNSUBSCRIBE", header::DESTINATION))?;
        if is_queue(destination) {
            self.broker.queues.unsubscribe(&self.connection, destination);
        } else {
            self.broker.topics.unsubscribe(&self.connection, destination);
        }
        Ok(())
    }

    fn begin(&mut self, frame: &StompFrame) -> Result<(), ProtocolError> {
        let transaction = frame
            .transaction()
            .ok_or_else(|| missing("BEGIN", header::TRANSACTION))?;
        if self.transactions.contains_key(transaction) {
            return Err(ProtocolError::TransactionAlreadyActive(
                transaction.to_string(),
            ));
        }
        self.transactions.insert(transaction.to_string(), Vec::new());
        Ok(())
    }

    fn commit(&mut self, frame: &StompFrame) -> Result<(), ProtocolError> {
        let transaction = frame
            .transaction()
            .ok_or_else(|| missing("COMMIT", header::TRANSACTION))?;
        let buffered = self
            .transactions
            .remove(transaction)
            .ok_or_else(|| ProtocolError::InvalidTransaction(transaction.to_string()))?;
        debug!(transaction, frames = buffered.len(), "committing transaction");
        for frame in buffered {
            self.route(frame)?;
        }
        self.broker
            .queues
            .clear_transaction_frames(&self.connection, transaction);
        Ok(())
    }

    fn abort(&mut self, frame: &StompFrame) -> Result<(), ProtocolError> {
        let transaction = frame
            .transaction()
            .ok_or_else(|| missing("ABORT", header::TRANSACTION))?;
        let discarded = self
            .transactions
            .remove(transaction)
            .ok_or_else(|| ProtocolError::InvalidTransaction(transaction.to_string()))?;
        debug!(transaction, frames = discarded.len(), "aborting transaction");
        self.broker
            .queues
            .resend_transaction_frames(&self.connection, transaction)?;
        Ok(())
    }

    fn ack(&self, frame: &StompFrame) -> Result<(), ProtocolError> {
        if frame.message_id().is_none() {
            return Err(missing("ACK", header::MESSAGE_ID));
        }
        let transaction = frame.transaction();
        if let Some(transaction) = transaction
            && !self.transactions.contains_key(transaction)
        {
            return Err(ProtocolError::InvalidTransaction(transaction.to_string()));
        }
        self.broker
            .queues
            .ack(&self.connection, frame, transaction)?;
        Ok(())
    }
}

fn is_queue(destination: &str) -> bool {
    destination.starts_with(QUEUE_PREFIX)
}

const fn missing(command: &'static str, header: &'static str) -> ProtocolError {
    ProtocolError::MissingHeader { command, header }
}
