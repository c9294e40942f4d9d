//! Configuration loader
//!
//! Loading runs in stages:
//! 1. Size check against [`ConfigLimits::max_config_size`]
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing into [`BrokerConfig`]
//! 4. Validation

use std::path::Path;

use coilmq_core::config::BrokerConfig;
use tracing::debug;

use crate::config::validation::Validator;
use crate::error::ConfigError;

/// Default configuration size limit (1 MiB).
pub const DEFAULT_MAX_CONFIG_SIZE: usize = 1024 * 1024;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Limits applied while loading.
    pub limits: ConfigLimits,
}

/// Resource limits for configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_config_size: env_or("COILMQ_MAX_CONFIG_SIZE", DEFAULT_MAX_CONFIG_SIZE),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: BrokerConfig,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Dotted path of the field the warning is about.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(ref location) => write!(f, "{} (at {location})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Loads broker configuration files.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a loader with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads, expands, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, references an
    /// unset environment variable, is not valid YAML for the schema, or
    /// fails validation.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let limit = self.options.limits.max_config_size;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > limit {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        debug!(path = %path.display(), bytes = raw.len(), "loading configuration");
        self.load_str(&raw, path)
    }

    /// Runs the loading pipeline on in-memory text.
    ///
    /// `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let limit = self.options.limits.max_config_size;
        if raw.len() > limit {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size: raw.len(),
                limit,
            });
        }
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let expanded = expand_env(raw, path)?;
        let config = parse(&expanded, path)?;

        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: result.errors,
            });
        }

        let warnings = result
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();
        Ok(LoadResult { config, warnings })
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse(text: &str, path: &Path) -> Result<BrokerConfig, ConfigError> {
    let parse_error = |e: serde_yaml::Error| ConfigError::ParseError {
        path: path.to_path_buf(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    };
    // An empty document (or one holding only comments) means "all defaults".
    let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(parse_error)?;
    if value.is_null() {
        return Ok(BrokerConfig::default());
    }
    serde_yaml::from_str(text).map_err(parse_error)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expands `${VAR}` and `${VAR:-default}` references in raw text.
///
/// `$$` is a literal `$`. A `$` not followed by `{` is kept as is. An unset
/// (or empty) variable with a default takes the default; an unset variable
/// without one is an error.
///
/// # Errors
///
/// Returns [`ConfigError::EnvVarNotSet`] for an unset variable without a
/// default, or [`ConfigError::ParseError`] for an unterminated or empty
/// reference.
pub fn expand_env(raw: &str, path: &Path) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let offset = raw.len() - rest.len() + pos;
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }
        let Some(body) = tail.strip_prefix('{') else {
            out.push('$');
            rest = tail;
            continue;
        };

        let line = line_at(raw, offset);
        let Some(end) = body.find('}') else {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: Some(line),
                message: "unterminated ${...} reference".to_string(),
            });
        };
        let reference = &body[..end];
        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };
        if name.is_empty() {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: Some(line),
                message: "empty variable name in ${...} reference".to_string(),
            });
        }

        let value = std::env::var(name).ok().filter(|v| !v.is_empty());
        match (value, default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => {
                return Err(ConfigError::EnvVarNotSet {
                    var: name.to_string(),
                    location: format!("{}:{line}", path.display()),
                });
            }
        }
        rest = &body[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// 1-based line number of byte `offset` in `text`.
fn line_at(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Parses an environment variable, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
