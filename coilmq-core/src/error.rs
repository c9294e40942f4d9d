//! Core error types for `CoilMQ`
//!
//! Frame decoding errors and the configuration/validation error types
//! shared across the workspace.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Frame Errors
// ============================================================================

/// Errors raised while decoding or encoding STOMP frames.
///
/// Every variant except [`FrameError::Io`] describes bytes sent by a peer,
/// and all of them are fatal to the stream they occur on.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error on the underlying stream
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The command line does not name a STOMP command
    #[error("Invalid command: {0}")]
    UnknownCommand(String),

    /// The frame is structurally invalid
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Command or header bytes are not valid UTF-8
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The frame exceeds the configured size limit
    #[error("frame too large: {size} bytes (limit: {limit})")]
    FrameTooLarge {
        /// Bytes buffered for the frame so far
        size: usize,
        /// Configured size limit in bytes
        limit: usize,
    },
}

impl FrameError {
    /// Short category name, used for metrics labels and log fields.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Malformed(_) => "malformed",
            Self::InvalidUtf8 => "invalid_utf8",
            Self::FrameTooLarge { .. } => "frame_too_large",
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}{}: {message}", line.map_or_else(String::new, |l| format!(" (line {l})")))]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Configuration file exceeds the size limit
    #[error("configuration file {path} is {size} bytes (limit: {limit})")]
    TooLarge {
        /// Path to the configuration file
        path: PathBuf,
        /// Actual size in bytes
        size: usize,
        /// Size limit in bytes
        limit: usize,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },

    /// One or more configuration files failed validation.
    #[error("{count} file(s) failed validation")]
    ValidationFailed {
        /// Number of files that failed validation.
        count: usize,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g., "server.listen")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}
