//! Authentication providers.
//!
//! An authenticator is built once from configuration and shared by every
//! connection, so implementations must be `Send + Sync`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use coilmq_core::config::AuthSettings;
use tracing::debug;

use crate::error::ConfigError;

/// Checks the credentials presented on CONNECT.
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `login`/`passcode` are valid.
    fn authenticate(&self, login: &str, passcode: &str) -> bool;
}

/// Authenticator backed by an in-memory `login -> passcode` table.
#[derive(Debug, Clone, Default)]
pub struct SimpleAuthenticator {
    users: HashMap<String, String>,
}

impl SimpleAuthenticator {
    /// Creates an authenticator from `(login, passcode)` pairs.
    pub fn new<I, K, V>(users: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            users: users
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads users from a YAML file containing a flat `login: passcode` map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] if the file does not exist, or
    /// [`ConfigError::ParseError`] if it is not a string-to-string mapping.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let users: BTreeMap<String, String> =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;
        debug!(path = %path.display(), users = users.len(), "loaded users file");
        Ok(Self::new(users))
    }

    /// Builds the authenticator described by the `auth` section.
    ///
    /// Returns `Ok(None)` when authentication is not configured. Inline
    /// users override users of the same login from `users_file`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`SimpleAuthenticator::from_file`].
    pub fn from_settings(settings: &AuthSettings) -> Result<Option<Self>, ConfigError> {
        if !settings.is_configured() {
            return Ok(None);
        }
        let mut auth = match settings.users_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };
        auth.users.extend(
            settings
                .users
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(Some(auth))
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if no users are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Authenticator for SimpleAuthenticator {
    fn authenticate(&self, login: &str, passcode: &str) -> bool {
        self.users.get(login).is_some_and(|p| p == passcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn authenticates_known_user() {
        let auth = SimpleAuthenticator::new([("guest", "secret")]);
        assert!(auth.authenticate("guest", "secret"));
    }

    #[test]
    fn rejects_wrong_passcode_and_unknown_login() {
        let auth = SimpleAuthenticator::new([("guest", "secret")]);
        assert!(!auth.authenticate("guest", "Secret"));
        assert!(!auth.authenticate("admin", "secret"));
        assert!(!auth.authenticate("", ""));
    }

    #[test]
    fn loads_users_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice: wonderland\nbob: builder").unwrap();
        let auth = SimpleAuthenticator::from_file(file.path()).unwrap();
        assert_eq!(auth.len(), 2);
        assert!(auth.authenticate("bob", "builder"));
    }

    #[test]
    fn missing_users_file_is_reported() {
        let err = SimpleAuthenticator::from_file(Path::new("/nonexistent/users.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn malformed_users_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "- not\n- a\n- mapping").unwrap();
        let err = SimpleAuthenticator::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn settings_without_users_disable_auth() {
        let auth = SimpleAuthenticator::from_settings(&AuthSettings::default()).unwrap();
        assert!(auth.is_none());
    }

    #[test]
    fn inline_users_override_file_users() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice: old\ncarol: c").unwrap();
        let settings = AuthSettings {
            users: [("alice".to_string(), "new".to_string())].into_iter().collect(),
            users_file: Some(file.path().to_path_buf()),
        };
        let auth = SimpleAuthenticator::from_settings(&settings).unwrap().unwrap();
        assert!(auth.authenticate("alice", "new"));
        assert!(!auth.authenticate("alice", "old"));
        assert!(auth.authenticate("carol", "c"));
    }
}
