//! Prometheus metrics for the broker.
//!
//! Every label value comes from a closed set (command names, error
//! categories, destination kinds), so label cardinality stays bounded.

use std::sync::atomic::{AtomicBool, Ordering};

use coilmq_core::Command;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::CoilMqError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `CoilMqError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), CoilMqError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| CoilMqError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "coilmq_frames_received_total",
        "Frames received from clients, by command"
    );
    describe_counter!(
        "coilmq_messages_routed_total",
        "Messages routed, by destination kind"
    );
    describe_counter!(
        "coilmq_messages_enqueued_total",
        "Queue messages stored for lack of an eligible subscriber"
    );
    describe_counter!(
        "coilmq_messages_requeued_total",
        "Queue messages returned to the store for redelivery"
    );
    describe_counter!("coilmq_errors_total", "Errors by category");
    describe_counter!(
        "coilmq_auth_failures_total",
        "Rejected CONNECT attempts"
    );
    describe_gauge!(
        "coilmq_connections_active",
        "Number of currently open client connections"
    );
}

/// Records a frame received from a client.
pub fn record_frame(command: Command) {
    counter!("coilmq_frames_received_total", "command" => command.as_str()).increment(1);
}

/// Records a message routed to a queue (`"queue"`) or topic (`"topic"`).
pub fn record_routed(kind: &'static str) {
    counter!("coilmq_messages_routed_total", "kind" => kind).increment(1);
}

/// Records a message stored in the queue backlog.
pub fn record_enqueued() {
    counter!("coilmq_messages_enqueued_total").increment(1);
}

/// Records a message returned to the queue backlog.
pub fn record_requeued() {
    counter!("coilmq_messages_requeued_total").increment(1);
}

/// Records an error by category.
pub fn record_error(category: &str) {
    counter!("coilmq_errors_total", "category" => category.to_owned()).increment(1);
}

/// Records a rejected CONNECT.
pub fn record_auth_failure() {
    counter!("coilmq_auth_failures_total").increment(1);
}

/// Sets the number of active connections.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections_active(count: usize) {
    gauge!("coilmq_connections_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        for command in Command::ALL {
            record_frame(command);
        }
        record_routed("queue");
        record_enqueued();
        record_requeued();
        record_error("protocol");
        record_auth_failure();
        set_connections_active(3);
    }
}
