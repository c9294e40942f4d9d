//! `CoilMQ` - a lightweight STOMP message broker
//!
//! The broker is split into a transport-agnostic protocol engine
//! ([`engine::StompEngine`]), the managers that route messages
//! ([`queue::QueueManager`] for point-to-point queues,
//! [`topic::TopicManager`] for fan-out topics), pluggable queue stores and
//! delivery schedulers, and a tokio TCP server that ties them together.

pub mod auth;
pub mod broker;
pub mod cli;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod observability;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod topic;

pub use coilmq_core::{Command, StompFrame};
