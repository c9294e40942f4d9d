//! Shared broker context.
//!
//! One [`Broker`] is built at startup and shared (via `Arc`) by every
//! connection's engine.

use std::sync::Arc;

use coilmq_core::config::BrokerConfig;
use tracing::info;

use crate::auth::{Authenticator, SimpleAuthenticator};
use crate::error::{Result, StoreError};
use crate::observability::EventEmitter;
use crate::queue::QueueManager;
use crate::scheduler::{queue_scheduler, subscriber_scheduler};
use crate::store::{MemoryQueue, open_store};
use crate::topic::TopicManager;

/// Routing state and services shared by all connections.
#[derive(Debug)]
pub struct Broker {
    /// Point-to-point queues.
    pub queues: QueueManager,
    /// Publish/subscribe topics.
    pub topics: TopicManager,
    /// Credential check for CONNECT; `None` accepts everyone.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Structured event sink.
    pub events: Arc<EventEmitter>,
}

impl Broker {
    /// Builds a broker with an in-memory store, default schedulers, no
    /// authentication and no event output.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            queues: QueueManager::new(Box::new(MemoryQueue::new())),
            topics: TopicManager::new(),
            authenticator: None,
            events: Arc::new(EventEmitter::noop()),
        }
    }

    /// Builds a broker from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the users file
    /// cannot be read.
    pub fn from_config(config: &BrokerConfig, events: Arc<EventEmitter>) -> Result<Self> {
        let store = open_store(&config.store)?;
        let queues = QueueManager::with_schedulers(
            store,
            subscriber_scheduler(config.scheduler.subscriber),
            queue_scheduler(config.scheduler.queue),
        );
        let authenticator = SimpleAuthenticator::from_settings(&config.auth)?.map(|auth| {
            info!(users = auth.len(), "authentication enabled");
            Arc::new(auth) as Arc<dyn Authenticator>
        });
        Ok(Self {
            queues,
            topics: TopicManager::new(),
            authenticator,
            events,
        })
    }

    /// Builder: sets the authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Releases the queue store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails to close.
    pub fn close(&self) -> std::result::Result<(), StoreError> {
        self.queues.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coilmq_core::config::{StoreBackend, SubscriberPolicy};

    #[test]
    fn in_memory_broker_has_no_auth() {
        let broker = Broker::in_memory();
        assert!(broker.authenticator.is_none());
        broker.close().unwrap();
    }

    #[test]
    fn from_config_enables_auth_with_users() {
        let mut config = BrokerConfig::default();
        config
            .auth
            .users
            .insert("guest".to_string(), "guest".to_string());
        config.scheduler.subscriber = SubscriberPolicy::Random;

        let broker = Broker::from_config(&config, Arc::new(EventEmitter::noop())).unwrap();
        let auth = broker.authenticator.as_ref().unwrap();
        assert!(auth.authenticate("guest", "guest"));
    }

    #[test]
    fn from_config_opens_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BrokerConfig::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = Some(dir.path().join("broker.db"));

        let broker = Broker::from_config(&config, Arc::new(EventEmitter::noop())).unwrap();
        assert_eq!(broker.queues.queue_depth("/queue/a").unwrap(), 0);
        broker.close().unwrap();
    }

    #[test]
    fn from_config_reports_missing_users_file() {
        let mut config = BrokerConfig::default();
        config.auth.users_file = Some("/nonexistent/users.yaml".into());
        let err = Broker::from_config(&config, Arc::new(EventEmitter::noop())).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::ExitCode::CONFIG_ERROR);
    }
}
