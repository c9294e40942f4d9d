//! Broker configuration schema.
//!
//! Loading (environment expansion, size limits) and semantic validation
//! live in the `coilmq` crate; this module only defines the shape of the
//! YAML document.

pub mod schema;

pub use schema::*;
