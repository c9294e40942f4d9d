//! Configuration schema types.
//!
//! These types are deserialized from the broker's YAML configuration file.
//! Every section is optional; an empty document yields a broker listening
//! on `127.0.0.1:61613` with an in-memory store and no authentication.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::ConfigError;

/// Default listen address (the IANA-registered STOMP port).
pub const DEFAULT_LISTEN: &str = "127.0.0.1:61613";

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for a `CoilMQ` broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Network listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Queue storage backend
    #[serde(default)]
    pub store: StoreSettings,

    /// Delivery scheduling policies
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Client authentication
    #[serde(default)]
    pub auth: AuthSettings,
}

// ============================================================================
// Sections
// ============================================================================

/// TCP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Address to bind, as `host:port`
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Maximum size of a single frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum number of simultaneous client connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Close connections that send nothing for this long (e.g. `"5m"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_frame_size: default_max_frame_size(),
            max_connections: None,
            idle_timeout: None,
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

const fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// Queue store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    /// Storage backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file (required for `sqlite`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Scheduling policy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    /// How a queue message picks among eligible subscribers
    #[serde(default)]
    pub subscriber: SubscriberPolicy,

    /// How a freed subscriber picks which backlog to drain next
    #[serde(default)]
    pub queue: QueuePolicy,
}

/// Authentication settings.
///
/// Authentication is enabled when at least one user is configured, either
/// inline or through `users_file`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSettings {
    /// Inline `login: passcode` pairs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, String>,

    /// YAML file holding a `login: passcode` mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_file: Option<PathBuf>,
}

impl AuthSettings {
    /// Returns `true` if any user source is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.users.is_empty() || self.users_file.is_some()
    }
}

// ============================================================================
// Named Policies
// ============================================================================

/// Queue storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum StoreBackend {
    /// Frames held in process memory (lost on restart)
    #[default]
    Memory,
    /// Frames persisted to a SQLite database file
    Sqlite,
}

/// Subscriber selection policy for queue messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum SubscriberPolicy {
    /// Prefer client-ack subscribers, pick randomly among them
    #[default]
    FavorReliable,
    /// Pick uniformly at random
    Random,
}

/// Backlog selection policy for a subscriber that became free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum QueuePolicy {
    /// Pick uniformly at random
    #[default]
    Random,
    /// Drain the deepest backlog first
    Largest,
}

/// Kebab-case names shared by config files and the CLI.
trait Named: Copy + PartialEq + 'static {
    const FIELD: &'static str;
    const VARIANTS: &'static [(&'static str, Self)];

    fn name(self) -> &'static str {
        Self::VARIANTS
            .iter()
            .find(|(_, v)| *v == self)
            .map_or("", |(n, _)| *n)
    }

    fn parse_named(value: &str) -> Result<Self, ConfigError> {
        if let Some((_, v)) = Self::VARIANTS.iter().find(|(n, _)| *n == value) {
            return Ok(*v);
        }
        let names: Vec<&str> = Self::VARIANTS.iter().map(|(n, _)| *n).collect();
        let mut expected = format!("one of: {}", names.join(", "));
        if let Some(s) = suggest(value, &names) {
            expected.push_str(&format!(" (did you mean '{s}'?)"));
        }
        Err(ConfigError::InvalidValue {
            field: Self::FIELD.to_string(),
            value: value.to_string(),
            expected,
        })
    }
}

impl Named for StoreBackend {
    const FIELD: &'static str = "store.backend";
    const VARIANTS: &'static [(&'static str, Self)] =
        &[("memory", Self::Memory), ("sqlite", Self::Sqlite)];
}

impl Named for SubscriberPolicy {
    const FIELD: &'static str = "scheduler.subscriber";
    const VARIANTS: &'static [(&'static str, Self)] = &[
        ("favor-reliable", Self::FavorReliable),
        ("random", Self::Random),
    ];
}

impl Named for QueuePolicy {
    const FIELD: &'static str = "scheduler.queue";
    const VARIANTS: &'static [(&'static str, Self)] =
        &[("random", Self::Random), ("largest", Self::Largest)];
}

macro_rules! named_impls {
    ($($ty:ty),*) => {$(
        impl TryFrom<String> for $ty {
            type Error = ConfigError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                <$ty as Named>::parse_named(&value)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as Named>::parse_named(s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Named::name(*self))
            }
        }
    )*};
}

named_impls!(StoreBackend, SubscriberPolicy, QueuePolicy);

/// Returns the closest candidate to `input`, if any is within two edits.
#[must_use]
pub fn suggest<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, strsim::damerau_levenshtein(input, c)))
        .filter(|(_, d)| *d <= 2)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: BrokerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.listen, DEFAULT_LISTEN);
        assert_eq!(config.server.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.scheduler.subscriber, SubscriberPolicy::FavorReliable);
        assert_eq!(config.scheduler.queue, QueuePolicy::Random);
        assert!(!config.auth.is_configured());
    }

    #[test]
    fn full_document_parses() {
        let yaml = r#"
server:
  listen: "0.0.0.0:61614"
  max_frame_size: 1024
  max_connections: 10
  idle_timeout: "30s"
store:
  backend: sqlite
  path: /var/lib/coilmq/queues.db
scheduler:
  subscriber: random
  queue: largest
auth:
  users:
    guest: secret
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:61614");
        assert_eq!(config.server.max_connections, Some(10));
        assert_eq!(config.server.idle_timeout.as_deref(), Some("30s"));
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.scheduler.subscriber, SubscriberPolicy::Random);
        assert_eq!(config.scheduler.queue, QueuePolicy::Largest);
        assert_eq!(config.auth.users.get("guest").map(String::as_str), Some("secret"));
        assert!(config.auth.is_configured());
    }

    #[test]
    fn unknown_backend_suggests_closest_name() {
        let err = serde_yaml::from_str::<BrokerConfig>("store:\n  backend: memroy\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("memroy"), "{msg}");
        assert!(msg.contains("did you mean 'memory'"), "{msg}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<BrokerConfig>("server:\n  port: 1\n").is_err());
        assert!(serde_yaml::from_str::<BrokerConfig>("metrics: {}\n").is_err());
    }

    #[test]
    fn policies_display_as_config_names() {
        assert_eq!(SubscriberPolicy::FavorReliable.to_string(), "favor-reliable");
        assert_eq!(QueuePolicy::Largest.to_string(), "largest");
        assert_eq!("sqlite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
    }

    #[test]
    fn suggest_ignores_distant_input() {
        assert_eq!(suggest("zzzzzz", &["memory", "sqlite"]), None);
        assert_eq!(suggest("sqlit", &["memory", "sqlite"]), Some("sqlite"));
    }
}
