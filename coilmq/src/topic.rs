//! Publish/subscribe topic routing.
//!
//! Every subscriber of a topic receives its own copy of each message. There
//! is no backlog: a message sent to a topic nobody listens to is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use coilmq_core::frame::header;
use coilmq_core::{Command, StompFrame};
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::error::RoutingError;
use crate::observability::metrics;

/// Distributes messages to topic subscribers.
#[derive(Debug, Default)]
pub struct TopicManager {
    topics: Mutex<HashMap<String, HashMap<ConnectionId, Connection>>>,
}

impl TopicManager {
    /// Creates a manager with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<ConnectionId, Connection>>> {
        self.topics.lock().expect("topic manager mutex poisoned")
    }

    /// Subscribes `connection` to a topic.
    pub fn subscribe(&self, connection: &Connection, destination: &str) {
        debug!(connection = connection.id(), destination, "subscribing to topic");
        self.lock()
            .entry(destination.to_string())
            .or_default()
            .insert(connection.id(), Arc::clone(connection));
    }

    /// Removes `connection` from a topic's subscribers.
    pub fn unsubscribe(&self, connection: &Connection, destination: &str) {
        debug!(connection = connection.id(), destination, "unsubscribing from topic");
        let mut topics = self.lock();
        if let Some(subscribers) = topics.get_mut(destination) {
            subscribers.remove(&connection.id());
            if subscribers.is_empty() {
                topics.remove(destination);
            }
        }
    }

    /// Removes `connection` from every topic.
    pub fn disconnect(&self, connection: &Connection) {
        let id = connection.id();
        debug!(connection = id, "disconnecting from topics");
        self.lock().retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
    }

    /// Delivers a copy of the message to every subscriber of its topic.
    ///
    /// The frame's command becomes `MESSAGE` and a `message-id` is assigned
    /// when absent. Subscribers whose connection is gone are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::MissingDestination`] if the frame has no
    /// destination.
    pub fn send(&self, mut message: StompFrame) -> Result<(), RoutingError> {
        let destination = message
            .destination()
            .ok_or(RoutingError::MissingDestination)?
            .to_string();
        message.command = Command::Message;
        if !message.headers.contains(header::MESSAGE_ID) {
            message
                .headers
                .insert(header::MESSAGE_ID, uuid::Uuid::new_v4().to_string());
        }
        metrics::record_routed("topic");

        let topics = self.lock();
        let Some(subscribers) = topics.get(&destination) else {
            debug!(destination, "no topic subscribers, dropping message");
            return Ok(());
        };
        for connection in subscribers.values() {
            if connection.send_frame(message.clone()).is_err() {
                debug!(
                    connection = connection.id(),
                    destination, "topic delivery failed, connection closed"
                );
            }
        }
        Ok(())
    }

    /// Ids of the connections subscribed to `destination`, sorted.
    #[must_use]
    pub fn subscribers(&self, destination: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .lock()
            .get(destination)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}
