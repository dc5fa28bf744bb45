//! Prometheus metrics for resource operations.

use crate::schema::Table;
use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

pub const OPERATIONS_TOTAL: &str = "timetable_resource_operations_total";

pub struct ResourceMetrics;

impl ResourceMetrics {
    /// Count one completed operation on `table`.
    pub fn record(table: Table, operation: &'static str) {
        ::metrics::counter!(OPERATIONS_TOTAL, "table" => table.name(), "operation" => operation)
            .increment(1);
    }

    pub fn register_metrics() {
        ::metrics::describe_counter!(
            OPERATIONS_TOTAL,
            "Completed resource operations, by table and operation"
        );
    }
}

/// Installs the Prometheus exporter on `port`. Idempotent; without a call
/// the counters go to the no-op recorder.
pub fn init_metrics(host: &str, port: u16) {
    INIT.call_once(|| {
        let addr: SocketAddr = match format!("{host}:{port}").parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid metrics address {}:{}: {}", host, port, e);
                return;
            }
        };
        let builder =
            metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                ResourceMetrics::register_metrics();
                info!("Prometheus exporter listening on http://{}/metrics", addr);
            }
            Err(e) => warn!("Prometheus exporter install failed: {}", e),
        }
    });
}
