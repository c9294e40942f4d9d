//! Configuration loading and validation.
//!
//! The schema itself lives in `coilmq_core::config`; this module turns a
//! YAML file into a validated [`BrokerConfig`].

pub mod loader;
pub mod validation;

pub use coilmq_core::config::{
    AuthSettings, BrokerConfig, QueuePolicy, SchedulerSettings, ServerSettings, StoreBackend,
    StoreSettings, SubscriberPolicy,
};
pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use validation::{ValidationResult, Validator};
