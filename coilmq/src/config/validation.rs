//! Configuration validation
//!
//! Runs on a fully deserialized [`BrokerConfig`] and collects every issue
//! instead of stopping at the first, so `coilmq validate` can report a
//! broken file in one pass.

use std::path::Path;

use coilmq_core::config::{BrokerConfig, StoreBackend};

use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Semantic validator for broker configurations.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &BrokerConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_server(config);
        self.validate_store(config);
        self.validate_auth(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_server(&mut self, config: &BrokerConfig) {
        let server = &config.server;
        if let Err(reason) = check_listen_address(&server.listen) {
            self.add_error(
                "server.listen",
                format!("invalid listen address '{}': {reason}", server.listen),
            );
        }
        if server.max_frame_size == 0 {
            self.add_error("server.max_frame_size", "must be greater than zero");
        }
        if server.max_connections == Some(0) {
            self.add_error("server.max_connections", "must be greater than zero");
        }
        if let Some(ref timeout) = server.idle_timeout {
            match humantime::parse_duration(timeout) {
                Ok(d) if d.is_zero() => {
                    self.add_error("server.idle_timeout", "must be greater than zero");
                }
                Ok(_) => {}
                Err(e) => self.add_error(
                    "server.idle_timeout",
                    format!("invalid duration '{timeout}': {e}"),
                ),
            }
        }
    }

    fn validate_store(&mut self, config: &BrokerConfig) {
        match config.store.backend {
            StoreBackend::Sqlite if config.store.path.is_none() => {
                self.add_error("store.path", "the sqlite backend requires a database path");
            }
            StoreBackend::Memory if config.auth.is_configured() => {
                self.add_warning(
                    "store.backend",
                    "memory store is not durable; queued messages are lost on restart",
                );
            }
            _ => {}
        }
    }

    fn validate_auth(&mut self, config: &BrokerConfig) {
        let Some(ref users_file) = config.auth.users_file else {
            return;
        };
        if !users_file.is_file() {
            self.add_error(
                "auth.users_file",
                format!("users file not found: {}", users_file.display()),
            );
            return;
        }
        if config.auth.users.is_empty() && users_file_is_empty(users_file) {
            self.add_warning(
                "auth.users_file",
                "users file defines no users; every CONNECT will be rejected",
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }
}

/// Checks a `host:port` listen address without resolving the host.
fn check_listen_address(listen: &str) -> Result<(), String> {
    let Some((host, port)) = listen.rsplit_once(':') else {
        return Err("expected host:port".to_string());
    };
    if host.is_empty() {
        return Err("missing host".to_string());
    }
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("'{port}' is not a valid port"))
}

/// A users file with no entries (empty document or `{}`).
fn users_file_is_empty(path: &Path) -> bool {
    std::fs::read_to_string(path).is_ok_and(|raw| {
        match serde_yaml::from_str::<serde_yaml::Value>(&raw) {
            Ok(serde_yaml::Value::Null) => true,
            Ok(serde_yaml::Value::Mapping(m)) => m.is_empty(),
            _ => false,
        }
    })
}
