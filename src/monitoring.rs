use crate::error::TickwireError;
use anyhow::Result;
use metrics::{Counter, Gauge, counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::LazyLock};
use tracing::{error, info};

// Global metrics
pub static MESSAGES_RECEIVED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tickwire_messages_received_total"));
pub static RECONNECT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tickwire_reconnects_total"));
pub static REFRESH_SIGNALS_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tickwire_refresh_signals_total"));
pub static REFRESH_RUNS_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tickwire_refresh_runs_total"));
pub static CONNECTED_GAUGE: LazyLock<Gauge> = LazyLock::new(|| gauge!("tickwire_connected"));

pub async fn setup_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "tickwire")
        .add_global_label("version", env!("CARGO_PKG_VERSION"));

    match builder.install() {
        Ok(_handle) => {
            info!(
                "Prometheus metrics server started on http://{}/metrics",
                addr
            );

            // Initialize metrics with default values
            MESSAGES_RECEIVED_COUNTER.absolute(0);
            RECONNECT_COUNTER.absolute(0);
            REFRESH_SIGNALS_COUNTER.absolute(0);
            REFRESH_RUNS_COUNTER.absolute(0);
            CONNECTED_GAUGE.set(0.0);

            Ok(())
        }
        Err(e) => {
            error!("Failed to start metrics server: {}", e);
            Err(TickwireError::MetricsError(e.to_string()).into())
        }
    }
}
