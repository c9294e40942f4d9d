//! `validate` command.
//!
//! Loads each file through the same pipeline as `run` and reports every
//! problem found, without binding anything.

use std::path::Path;

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, LoadWarning};
use crate::error::{CoilMqError, ConfigError};

/// Outcome of validating one file.
#[derive(Debug)]
pub struct FileReport {
    /// File that was checked.
    pub file: String,
    /// Problems that make the file unusable.
    pub errors: Vec<String>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl FileReport {
    /// Whether the file passes, treating warnings as errors when `strict`.
    #[must_use]
    pub fn passed(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

/// Validates a single configuration file.
#[must_use]
pub fn check_file(loader: &ConfigLoader, path: &Path) -> FileReport {
    let file = path.display().to_string();
    match loader.load(path) {
        Ok(result) => FileReport {
            file,
            errors: Vec::new(),
            warnings: result.warnings.iter().map(LoadWarning::to_string).collect(),
        },
        Err(ConfigError::ValidationError { errors, .. }) => FileReport {
            file,
            errors: errors.iter().map(ToString::to_string).collect(),
            warnings: Vec::new(),
        },
        Err(e) => FileReport {
            file,
            errors: vec![e.to_string()],
            warnings: Vec::new(),
        },
    }
}

/// Validate configuration files without starting the broker.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationFailed`] if any file fails (including
/// warnings under `--strict`).
pub fn run(args: &ValidateArgs) -> Result<(), CoilMqError> {
    let loader = ConfigLoader::with_defaults();
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| {
            tracing::info!(file = %path.display(), "validating configuration");
            check_file(&loader, path)
        })
        .collect();

    match args.format {
        OutputFormat::Human => print_human(&reports, args.strict),
        OutputFormat::Json => println!("{}", render_json(&reports, args.strict)),
    }

    let count = reports.iter().filter(|r| !r.passed(args.strict)).count();
    if count > 0 {
        return Err(ConfigError::ValidationFailed { count }.into());
    }
    Ok(())
}

fn print_human(reports: &[FileReport], strict: bool) {
    for report in reports {
        let status = if report.passed(strict) { "ok" } else { "FAILED" };
        println!("{}: {status}", report.file);
        for error in &report.errors {
            println!("  {error}");
        }
        for warning in &report.warnings {
            println!("  warning: {warning}");
        }
    }
}

fn render_json(reports: &[FileReport], strict: bool) -> serde_json::Value {
    let files: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "file": r.file,
                "valid": r.passed(strict),
                "errors": r.errors,
                "warnings": r.warnings,
            })
        })
        .collect();
    json!({ "strict": strict, "files": files })
}
