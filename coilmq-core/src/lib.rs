//! `CoilMQ` Core: STOMP frames, wire codec and configuration schema
//!
//! This crate provides the types shared between the `coilmq` broker and
//! anything else that needs to speak STOMP 1.0 or read broker configuration
//! (fuzz targets, embedding applications).

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, StompCodec};
pub use error::FrameError;
pub use frame::{Command, Headers, StompFrame};
