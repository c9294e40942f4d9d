//! Point-to-point queue routing.
//!
//! Each message sent to a queue destination is delivered to exactly one
//! subscriber. Reliable subscribers (`ack: client`) hold at most one
//! unacknowledged frame at a time; messages with no eligible subscriber wait
//! in the [`QueueStore`] until one becomes available.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use coilmq_core::frame::header;
use coilmq_core::{Command, StompFrame};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionClosed, ConnectionId};
use crate::error::{RoutingError, StoreError};
use crate::observability::metrics;
use crate::scheduler::{
    Backlog, FavorReliableSubscriberScheduler, QueueScheduler, RandomQueueScheduler,
    SubscriberScheduler,
};
use crate::store::{Frames, QueueStore};

/// A frame delivered to a reliable subscriber and not yet acknowledged.
///
/// Also holds a frame the store refused to take back from a closed
/// connection, until `disconnect` or `close` gets it into the store.
#[derive(Debug)]
struct Pending {
    destination: String,
    frame: StompFrame,
}

/// A failed routing attempt. Carries the frame back when it was neither
/// delivered nor stored.
#[derive(Debug)]
struct Unrouted {
    error: RoutingError,
    frame: Option<StompFrame>,
}

#[derive(Debug)]
struct QueueState {
    store: Box<dyn QueueStore>,
    queues: HashMap<String, HashMap<ConnectionId, Connection>>,
    pending: HashMap<ConnectionId, Pending>,
    /// Frames acknowledged inside a still-open transaction, per connection
    /// and transaction id.
    transaction_frames: HashMap<ConnectionId, HashMap<String, Vec<StompFrame>>>,
}

/// Distributes messages to queue subscribers.
#[derive(Debug)]
pub struct QueueManager {
    subscriber_scheduler: Box<dyn SubscriberScheduler>,
    queue_scheduler: Box<dyn QueueScheduler>,
    state: Mutex<QueueState>,
}

impl QueueManager {
    /// Creates a manager with the default scheduling policies.
    #[must_use]
    pub fn new(store: Box<dyn QueueStore>) -> Self {
        Self::with_schedulers(
            store,
            Box::new(FavorReliableSubscriberScheduler),
            Box::new(RandomQueueScheduler),
        )
    }

    /// Creates a manager with explicit scheduling policies.
    #[must_use]
    pub fn with_schedulers(
        store: Box<dyn QueueStore>,
        subscriber_scheduler: Box<dyn SubscriberScheduler>,
        queue_scheduler: Box<dyn QueueScheduler>,
    ) -> Self {
        Self {
            subscriber_scheduler,
            queue_scheduler,
            state: Mutex::new(QueueState {
                store,
                queues: HashMap::new(),
                pending: HashMap::new(),
                transaction_frames: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue manager mutex poisoned")
    }

    /// Subscribes `connection` to a queue and sends it any backlog.
    ///
    /// A reliable subscriber receives a single backlog frame, and only if it
    /// has nothing pending; any other subscriber receives the whole backlog.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Store`] if the backlog cannot be read.
    pub fn subscribe(&self, connection: &Connection, destination: &str) -> Result<(), RoutingError> {
        debug!(connection = connection.id(), destination, "subscribing to queue");
        let mut state = self.lock();
        state
            .queues
            .entry(destination.to_string())
            .or_default()
            .insert(connection.id(), Arc::clone(connection));
        state.send_backlog(connection, destination)?;
        Ok(())
    }

    /// Removes `connection` from a queue's subscribers.
    pub fn unsubscribe(&self, connection: &Connection, destination: &str) {
        debug!(connection = connection.id(), destination, "unsubscribing from queue");
        let mut state = self.lock();
        if let Some(subscribers) = state.queues.get_mut(destination) {
            subscribers.remove(&connection.id());
            if subscribers.is_empty() {
                state.queues.remove(destination);
            }
        }
    }

    /// Forgets a connection entirely.
    ///
    /// The unacknowledged frame, if any, goes back to the front of its
    /// queue. Frames acknowledged in transactions the connection never
    /// finished are routed again, as if those transactions were aborted.
    ///
    /// Frames the store refuses stay attached to the connection, so calling
    /// `disconnect` again retries them.
    ///
    /// # Errors
    ///
    /// Returns the first [`RoutingError::Store`] hit; the remaining frames
    /// are still processed.
    pub fn disconnect(&self, connection: &Connection) -> Result<(), RoutingError> {
        let id = connection.id();
        debug!(connection = id, "disconnecting from queues");
        let mut state = self.lock();
        state.queues.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });

        let mut failure: Option<RoutingError> = None;
        if let Some(pending) = state.pending.remove(&id) {
            match state.store.requeue(&pending.destination, pending.frame.clone()) {
                Ok(()) => metrics::record_requeued(),
                Err(e) => {
                    warn!(connection = id, error = %e, "failed to requeue pending frame");
                    state.pending.insert(id, pending);
                    failure = Some(e.into());
                }
            }
        }

        let unfinished = state.transaction_frames.remove(&id).unwrap_or_default();
        for (transaction, frames) in unfinished {
            let (kept, error) = self.route_all(&mut state, frames);
            if !kept.is_empty() {
                state
                    .transaction_frames
                    .entry(id)
                    .or_default()
                    .insert(transaction, kept);
            }
            if let Some(error) = error {
                failure.get_or_insert(error);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Sends a message to one eligible subscriber, or stores it.
    ///
    /// The frame's command becomes `MESSAGE` and a `message-id` is assigned
    /// when absent. Subscribers with a pending frame are not eligible.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::MissingDestination`] if the frame has no
    /// destination, or [`RoutingError::Store`] if it cannot be stored.
    pub fn send(&self, message: StompFrame) -> Result<(), RoutingError> {
        let mut state = self.lock();
        self.route(&mut state, message).map_err(|unrouted| unrouted.error)
    }

    fn route(&self, state: &mut QueueState, mut message: StompFrame) -> Result<(), Unrouted> {
        let Some(destination) = message.destination().map(str::to_string) else {
            return Err(Unrouted {
                error: RoutingError::MissingDestination,
                frame: Some(message),
            });
        };
        message.command = Command::Message;
        if !message.headers.contains(header::MESSAGE_ID) {
            message
                .headers
                .insert(header::MESSAGE_ID, uuid::Uuid::new_v4().to_string());
        }
        metrics::record_routed("queue");

        let eligible: Vec<Connection> = state
            .queues
            .get(&destination)
            .map(|subscribers| {
                subscribers
                    .values()
                    .filter(|c| !state.pending.contains_key(&c.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        match self.subscriber_scheduler.choose(&eligible, &message) {
            Some(connection) => state
                .deliver(connection, &destination, message)
                .map_err(|e| Unrouted {
                    error: e.into(),
                    frame: None,
                }),
            None => {
                debug!(destination, "no eligible subscriber, storing message");
                match state.store.enqueue(&destination, message.clone()) {
                    Ok(()) => {
                        metrics::record_enqueued();
                        Ok(())
                    }
                    Err(e) => Err(Unrouted {
                        error: e.into(),
                        frame: Some(message),
                    }),
                }
            }
        }
    }

    /// Routes every frame, carrying on past failures. Returns the frames
    /// that were neither delivered nor stored, along with the first error.
    fn route_all(
        &self,
        state: &mut QueueState,
        frames: Vec<StompFrame>,
    ) -> (Vec<StompFrame>, Option<RoutingError>) {
        let mut kept = Vec::new();
        let mut first_error = None;
        for frame in frames {
            if let Err(Unrouted { error, frame }) = self.route(state, frame) {
                warn!(error = %error, "failed to route frame");
                kept.extend(frame);
                first_error.get_or_insert(error);
            }
        }
        (kept, first_error)
    }

    /// Acknowledges the connection's pending frame.
    ///
    /// An ACK naming a different `message-id` than the pending frame returns
    /// the pending frame to its queue. With a `transaction`, the acknowledged
    /// frame is remembered so an abort can redeliver it. Either way the
    /// connection is then offered its next backlog frame.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Store`] if the store fails.
    pub fn ack(
        &self,
        connection: &Connection,
        frame: &StompFrame,
        transaction: Option<&str>,
    ) -> Result<(), RoutingError> {
        let id = connection.id();
        let mut state = self.lock();
        let Some(pending) = state.pending.remove(&id) else {
            debug!(connection = id, "ACK with no pending message");
            return Ok(());
        };

        if pending.frame.message_id() == frame.message_id() {
            if let Some(transaction) = transaction {
                state
                    .transaction_frames
                    .entry(id)
                    .or_default()
                    .entry(transaction.to_string())
                    .or_default()
                    .push(pending.frame);
            }
        } else {
            warn!(
                connection = id,
                expected = pending.frame.message_id().unwrap_or_default(),
                got = frame.message_id().unwrap_or_default(),
                "ACK for unexpected message-id, requeueing pending message"
            );
            if let Err(e) = state.store.requeue(&pending.destination, pending.frame.clone()) {
                state.pending.insert(id, pending);
                return Err(e.into());
            }
            metrics::record_requeued();
        }

        state.send_subscriber_backlog(&*self.queue_scheduler, connection)?;
        Ok(())
    }

    /// Re-routes every frame the connection acknowledged in an aborted
    /// transaction.
    ///
    /// Frames that can be neither delivered nor stored stay with the
    /// transaction, so a later call resends them.
    ///
    /// # Errors
    ///
    /// Returns the first [`RoutingError::Store`] hit.
    pub fn resend_transaction_frames(
        &self,
        connection: &Connection,
        transaction: &str,
    ) -> Result<(), RoutingError> {
        let id = connection.id();
        let mut state = self.lock();
        let frames = take_transaction_frames(&mut state, id, transaction);
        debug!(
            connection = id,
            transaction,
            count = frames.len(),
            "resending frames acknowledged in aborted transaction"
        );
        let (kept, error) = self.route_all(&mut state, frames);
        if !kept.is_empty() {
            state
                .transaction_frames
                .entry(id)
                .or_default()
                .entry(transaction.to_string())
                .or_default()
                .extend(kept);
        }
        error.map_or(Ok(()), Err)
    }

    /// Forgets frames acknowledged in a committed transaction.
    pub fn clear_transaction_frames(&self, connection: &Connection, transaction: &str) {
        let mut state = self.lock();
        take_transaction_frames(&mut state, connection.id(), transaction);
    }

    /// Ids of the connections subscribed to `destination`, sorted.
    #[must_use]
    pub fn subscribers(&self, destination: &str) -> Vec<ConnectionId> {
        let state = self.lock();
        let mut ids: Vec<ConnectionId> = state
            .queues
            .get(destination)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Number of frames stored for `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub fn queue_depth(&self, destination: &str) -> Result<usize, StoreError> {
        self.lock().store.size(destination)
    }

    /// Number of connections with an unacknowledged frame.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Closes the underlying store.
    ///
    /// Frames still held for connections (unacknowledged, or acknowledged
    /// in an unfinished transaction) are written back to the store first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails to close.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        let held: Vec<(String, StompFrame)> = state
            .pending
            .drain()
            .map(|(_, pending)| (pending.destination, pending.frame))
            .collect();
        for (destination, frame) in held {
            let message_id = frame.message_id().unwrap_or_default().to_string();
            if let Err(e) = state.store.requeue(&destination, frame) {
                warn!(
                    destination = %destination,
                    message_id = %message_id,
                    error = %e,
                    "dropping unacknowledged frame at close"
                );
            }
        }
        let unfinished: Vec<StompFrame> = state
            .transaction_frames
            .drain()
            .flat_map(|(_, by_tx)| by_tx.into_values().flatten())
            .collect();
        for frame in unfinished {
            let Some(destination) = frame.destination().map(str::to_string) else {
                continue;
            };
            let message_id = frame.message_id().unwrap_or_default().to_string();
            if let Err(e) = state.store.enqueue(&destination, frame) {
                warn!(
                    destination = %destination,
                    message_id = %message_id,
                    error = %e,
                    "dropping transaction frame at close"
                );
            }
        }
        state.store.close()
    }
}

fn take_transaction_frames(
    state: &mut QueueState,
    id: ConnectionId,
    transaction: &str,
) -> Vec<StompFrame> {
    let Some(by_tx) = state.transaction_frames.get_mut(&id) else {
        return Vec::new();
    };
    let frames = by_tx.remove(transaction).unwrap_or_default();
    if by_tx.is_empty() {
        state.transaction_frames.remove(&id);
    }
    frames
}

impl QueueState {
    /// Hands a frame to a subscriber that has nothing pending, tracking it
    /// as pending when the subscriber is reliable. A frame the connection
    /// refuses goes back to the front of the queue.
    fn deliver(
        &mut self,
        connection: &Connection,
        destination: &str,
        frame: StompFrame,
    ) -> Result<(), StoreError> {
        let id = connection.id();
        debug_assert!(
            !self.pending.contains_key(&id),
            "connection {id} already has a pending frame"
        );
        if connection.reliable_subscriber() {
            debug!(connection = id, %frame, "adding pending frame");
            self.pending.insert(
                id,
                Pending {
                    destination: destination.to_string(),
                    frame: frame.clone(),
                },
            );
        }
        if let Err(ConnectionClosed(frame)) = connection.send_frame(frame) {
            debug!(connection = id, destination, "delivery failed, connection closed");
            self.return_undelivered(id, destination, frame)?;
        }
        Ok(())
    }

    /// Puts a frame a closed connection did not take back at the front of
    /// its queue. If the store refuses it, the frame stays pending on the
    /// connection until `disconnect` requeues it.
    fn return_undelivered(
        &mut self,
        id: ConnectionId,
        destination: &str,
        frame: StompFrame,
    ) -> Result<(), StoreError> {
        match self.store.requeue(destination, frame.clone()) {
            Ok(()) => {
                self.pending.remove(&id);
                metrics::record_requeued();
                Ok(())
            }
            Err(e) => {
                self.pending.insert(
                    id,
                    Pending {
                        destination: destination.to_string(),
                        frame,
                    },
                );
                Err(e)
            }
        }
    }

    fn send_backlog(&mut self, connection: &Connection, destination: &str) -> Result<(), StoreError> {
        if connection.reliable_subscriber() {
            if self.pending.contains_key(&connection.id()) {
                return Ok(());
            }
            if let Some(frame) = self.store.dequeue(destination)? {
                self.deliver(connection, destination, frame)?;
            }
            return Ok(());
        }

        let mut undelivered = None;
        for frame in Frames::new(self.store.as_mut(), destination) {
            if let Err(ConnectionClosed(frame)) = connection.send_frame(frame?) {
                undelivered = Some(frame);
                break;
            }
        }
        match undelivered {
            Some(frame) => self.return_undelivered(connection.id(), destination, frame),
            None => Ok(()),
        }
    }

    /// Offers a connection that just became free one frame from the
    /// backlog of a queue it subscribes to.
    fn send_subscriber_backlog(
        &mut self,
        scheduler: &dyn QueueScheduler,
        connection: &Connection,
    ) -> Result<(), StoreError> {
        let id = connection.id();
        let mut backlogs = Vec::new();
        for (destination, subscribers) in &self.queues {
            if !subscribers.contains_key(&id) {
                continue;
            }
            let depth = self.store.size(destination)?;
            if depth > 0 {
                backlogs.push(Backlog {
                    destination: destination.as_str(),
                    depth,
                });
            }
        }

        let Some(selected) = scheduler.choose(&backlogs, connection) else {
            debug!(connection = id, "no eligible queues");
            return Ok(());
        };
        let selected = selected.to_string();
        if let Some(frame) = self.store.dequeue(&selected)? {
            self.deliver(connection, &selected, frame)?;
        }
        Ok(())
    }
}
