//! Delivery scheduling policies.
//!
//! Two decisions are pluggable:
//! - which subscriber of a queue receives a newly sent message
//!   ([`SubscriberScheduler`]);
//! - which queue backlog a subscriber that just became free drains next
//!   ([`QueueScheduler`]).

use std::fmt;

use coilmq_core::StompFrame;
use coilmq_core::config::{QueuePolicy, SubscriberPolicy};
use rand::seq::IndexedRandom;

use crate::connection::Connection;

/// A queue backlog offered to a [`QueueScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backlog<'a> {
    /// Queue destination
    pub destination: &'a str,
    /// Number of frames waiting
    pub depth: usize,
}

/// Picks the subscriber that receives a queue message.
pub trait SubscriberScheduler: Send + Sync + fmt::Debug {
    /// Chooses among `subscribers`, or `None` if the slice is empty.
    fn choose<'a>(&self, subscribers: &'a [Connection], message: &StompFrame)
    -> Option<&'a Connection>;
}

/// Picks which backlog to serve a connection that can accept a frame.
pub trait QueueScheduler: Send + Sync + fmt::Debug {
    /// Chooses among `backlogs`, or `None` if the slice is empty.
    fn choose<'a>(&self, backlogs: &[Backlog<'a>], connection: &Connection) -> Option<&'a str>;
}

// ============================================================================
// Subscriber Schedulers
// ============================================================================

/// Uniformly random subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSubscriberScheduler;

impl SubscriberScheduler for RandomSubscriberScheduler {
    fn choose<'a>(
        &self,
        subscribers: &'a [Connection],
        _message: &StompFrame,
    ) -> Option<&'a Connection> {
        subscribers.choose(&mut rand::rng())
    }
}

/// Random subscriber, preferring those that acknowledge messages.
///
/// Reliable subscribers take one message at a time, so favouring them
/// keeps fire-and-forget subscribers from absorbing the whole stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FavorReliableSubscriberScheduler;

impl SubscriberScheduler for FavorReliableSubscriberScheduler {
    fn choose<'a>(
        &self,
        subscribers: &'a [Connection],
        _message: &StompFrame,
    ) -> Option<&'a Connection> {
        let reliable: Vec<&'a Connection> = subscribers
            .iter()
            .filter(|c| c.reliable_subscriber())
            .collect();
        let mut rng = rand::rng();
        reliable
            .choose(&mut rng)
            .copied()
            .or_else(|| subscribers.choose(&mut rng))
    }
}

// ============================================================================
// Queue Schedulers
// ============================================================================

/// Uniformly random backlog.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomQueueScheduler;

impl QueueScheduler for RandomQueueScheduler {
    fn choose<'a>(&self, backlogs: &[Backlog<'a>], _connection: &Connection) -> Option<&'a str> {
        backlogs.choose(&mut rand::rng()).map(|b| b.destination)
    }
}

/// The deepest backlog; ties go to the first offered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestQueueScheduler;

impl QueueScheduler for LargestQueueScheduler {
    fn choose<'a>(&self, backlogs: &[Backlog<'a>], _connection: &Connection) -> Option<&'a str> {
        backlogs
            .iter()
            .rev()
            .max_by_key(|b| b.depth)
            .map(|b| b.destination)
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Builds the subscriber scheduler for a configured policy.
#[must_use]
pub fn subscriber_scheduler(policy: SubscriberPolicy) -> Box<dyn SubscriberScheduler> {
    match policy {
        SubscriberPolicy::FavorReliable => Box::new(FavorReliableSubscriberScheduler),
        SubscriberPolicy::Random => Box::new(RandomSubscriberScheduler),
    }
}

/// Builds the queue scheduler for a configured policy.
#[must_use]
pub fn queue_scheduler(policy: QueuePolicy) -> Box<dyn QueueScheduler> {
    match policy {
        QueuePolicy::Random => Box::new(RandomQueueScheduler),
        QueuePolicy::Largest => Box::new(LargestQueueScheduler),
    }
}
