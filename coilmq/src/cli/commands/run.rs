//! `run` command: start the broker.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::cli::args::RunArgs;
use crate::config::{BrokerConfig, ConfigLoader, Validator};
use crate::error::{CoilMqError, ConfigError};
use crate::observability::{Event, EventEmitter, init_metrics};
use crate::server::{ServerOptions, StompServer};

/// Start the broker and serve until `cancel` fires.
///
/// # Errors
///
/// Returns a config error if the configuration (after command-line
/// overrides) is invalid, a server error if the listen address cannot be
/// bound, or a store error if the queue store cannot be opened or closed.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), CoilMqError> {
    let config = resolve_config(args)?;

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let events = Arc::new(match args.events_file {
        Some(ref path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    });

    let broker = Arc::new(Broker::from_config(&config, Arc::clone(&events))?);
    let options = ServerOptions::from_settings(&config.server)?;
    let server = StompServer::bind(
        &config.server.listen,
        Arc::clone(&broker),
        options,
        cancel.clone(),
    )
    .await?;

    events.emit(Event::BrokerStarted {
        timestamp: Utc::now(),
        listen: server.local_addr().to_string(),
        store: config.store.backend.to_string(),
    });
    info!(
        store = %config.store.backend,
        subscriber_scheduler = %config.scheduler.subscriber,
        queue_scheduler = %config.scheduler.queue,
        "broker started"
    );

    let result = server.run().await;
    if let Err(ref e) = result {
        warn!(error = %e, "listener failed");
    }
    broker.close()?;

    events.emit(Event::BrokerStopped {
        timestamp: Utc::now(),
        reason: match &result {
            Ok(()) => "shutdown".to_string(),
            Err(e) => format!("error: {e}"),
        },
    });
    info!("broker stopped");

    result.map_err(Into::into)
}

/// Loads the configuration file (if any), applies command-line overrides and
/// validates the result.
///
/// # Errors
///
/// Returns a [`ConfigError`] if loading fails or the overridden
/// configuration does not validate.
pub fn resolve_config(args: &RunArgs) -> Result<BrokerConfig, ConfigError> {
    let mut config = match args.config {
        Some(ref path) => {
            info!(config = %path.display(), "loading configuration");
            let loaded = ConfigLoader::with_defaults().load(path)?;
            for warning in &loaded.warnings {
                warn!(
                    location = warning.location.as_deref().unwrap_or("<unknown>"),
                    "{}",
                    warning.message
                );
            }
            loaded.config
        }
        None => BrokerConfig::default(),
    };

    if !apply_overrides(&mut config, args) {
        return Ok(config);
    }

    // Flags can produce combinations the file alone did not, e.g. `--store sqlite`.
    let result = Validator::new().validate(&config);
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: "<command line>".to_string(),
            errors: result.errors,
        });
    }
    Ok(config)
}

/// Applies command-line flags over `config`. Returns `true` if any flag was set.
pub fn apply_overrides(config: &mut BrokerConfig, args: &RunArgs) -> bool {
    let mut changed = false;
    if let Some(ref listen) = args.listen {
        config.server.listen.clone_from(listen);
        changed = true;
    }
    if let Some(backend) = args.store {
        config.store.backend = backend;
        changed = true;
    }
    if let Some(ref path) = args.store_path {
        config.store.path = Some(path.clone());
        changed = true;
    }
    if let Some(policy) = args.subscriber_scheduler {
        config.scheduler.subscriber = policy;
        changed = true;
    }
    if let Some(policy) = args.queue_scheduler {
        config.scheduler.queue = policy;
        changed = true;
    }
    if let Some(ref path) = args.users_file {
        config.auth.users_file = Some(path.clone());
        changed = true;
    }
    changed
}
