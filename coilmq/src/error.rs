//! Error types for `CoilMQ`
//!
//! The broker distinguishes errors a client caused (reported back as STOMP
//! `ERROR` frames, never fatal to the broker) from errors that stop the
//! process (mapped to exit codes).

use thiserror::Error;

pub use coilmq_core::error::{ConfigError, FrameError, Severity, ValidationIssue};

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `CoilMQ` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Server error (bind failure, listener error)
    pub const SERVER_ERROR: i32 = 4;

    /// Queue store error (database unavailable or corrupt)
    pub const STORE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `CoilMQ` operations.
#[derive(Debug, Error)]
pub enum CoilMqError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listener or connection handling error
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Queue store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoilMqError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Server(_) => ExitCode::SERVER_ERROR,
            Self::Store(_) => ExitCode::STORE_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Protocol Errors
// ============================================================================

/// Errors caused by a client frame.
///
/// The engine turns these into `ERROR` frames; the `Display` text becomes
/// the frame's `message` header.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A command other than CONNECT arrived before the session was opened
    #[error("Not connected")]
    NotConnected,

    /// CONNECT on a session that is already open
    #[error("Already connected")]
    AlreadyConnected,

    /// The client sent a server-side command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A required header is absent
    #[error("Missing {header} for {command} command")]
    MissingHeader {
        /// The command that was sent
        command: &'static str,
        /// The header it requires
        header: &'static str,
    },

    /// Login/passcode did not authenticate
    #[error("Authentication failed for '{login}'")]
    AuthenticationFailed {
        /// Login presented by the client (empty when absent)
        login: String,
    },

    /// The transaction is not open on this session
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// BEGIN for a transaction that is already open
    #[error("Transaction already active: {0}")]
    TransactionAlreadyActive(String),

    /// The broker could not route or store the frame
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

impl ProtocolError {
    /// Short category name, used for metrics labels.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::NotConnected | Self::AlreadyConnected => "session",
            Self::InvalidCommand(_) => "invalid_command",
            Self::MissingHeader { .. } => "missing_header",
            Self::AuthenticationFailed { .. } => "auth",
            Self::InvalidTransaction(_) | Self::TransactionAlreadyActive(_) => "transaction",
            Self::Routing(_) => "routing",
        }
    }
}

// ============================================================================
// Routing Errors
// ============================================================================

/// Errors raised by the queue and topic managers.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A frame without a destination reached a manager
    #[error("Missing destination")]
    MissingDestination,

    /// The queue store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Store Errors
// ============================================================================

/// Queue store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite backend failure
    #[error("store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted frame could not be decoded
    #[error("stored frame is corrupt: {0}")]
    Corrupt(#[from] FrameError),

    /// The store has been closed
    #[error("store is closed")]
    Closed,
}

// ============================================================================
// Server Errors
// ============================================================================

/// Listener errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Listener failure after startup
    #[error("listener error: {0}")]
    Listener(#[from] std::io::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `CoilMQ` operations.
pub type Result<T> = std::result::Result<T, CoilMqError>;

// ============================================================================
// Tests
// ============================================================================
