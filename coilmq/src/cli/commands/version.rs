//! Version information display.

use crate::cli::args::{OutputFormat, VersionArgs};

/// Renders the version line for the requested format.
#[must_use]
pub fn render(format: OutputFormat) -> String {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");

    match format {
        OutputFormat::Human => format!("{name} {version} (STOMP 1.0)"),
        OutputFormat::Json => serde_json::json!({
            "name": name,
            "version": version,
            "protocol": "1.0",
        })
        .to_string(),
    }
}

/// Print version information.
pub fn run(args: &VersionArgs) {
    println!("{}", render(args.format));
}
