//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping of link counters.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MetricsConfig;
use crate::link::{ConnectionState, LinkMetrics, LinkMetricsSnapshot};

/// Install the Prometheus exporter and start syncing `link` counters into it
pub fn init_metrics(
    config: &MetricsConfig,
    link: Arc<LinkMetrics>,
    state: watch::Receiver<ConnectionState>,
) -> Result<JoinHandle<()>> {
    describe_counter!("roverlink_connect_attempts", "Transport open attempts");
    describe_counter!("roverlink_connect_failures", "Transport open failures");
    describe_counter!("roverlink_connections_established", "Successful connects");
    describe_counter!("roverlink_disconnects", "Established links that were lost or stopped");
    describe_counter!("roverlink_messages_sent", "Messages written immediately");
    describe_counter!("roverlink_messages_queued", "Messages deferred to the outgoing queue");
    describe_counter!("roverlink_messages_evicted", "Queued messages dropped on overflow");
    describe_counter!("roverlink_messages_flushed", "Queued messages written after reconnect");
    describe_counter!("roverlink_messages_received", "Inbound messages delivered");
    describe_gauge!("roverlink_connected", "1 while the link is connected");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    Ok(tokio::spawn(sync_metrics_task(link, state)))
}

/// Background task that periodically syncs link counters to the metrics crate
async fn sync_metrics_task(link: Arc<LinkMetrics>, state: watch::Receiver<ConnectionState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = LinkMetricsSnapshot::default();

    loop {
        interval.tick().await;

        let snapshot = link.snapshot();
        let deltas = [
            ("roverlink_connect_attempts", snapshot.connect_attempts, last.connect_attempts),
            ("roverlink_connect_failures", snapshot.connect_failures, last.connect_failures),
            (
                "roverlink_connections_established",
                snapshot.connections_established,
                last.connections_established,
            ),
            ("roverlink_disconnects", snapshot.disconnects, last.disconnects),
            ("roverlink_messages_sent", snapshot.messages_sent, last.messages_sent),
            ("roverlink_messages_queued", snapshot.messages_queued, last.messages_queued),
            ("roverlink_messages_evicted", snapshot.messages_evicted, last.messages_evicted),
            ("roverlink_messages_flushed", snapshot.messages_flushed, last.messages_flushed),
            ("roverlink_messages_received", snapshot.messages_received, last.messages_received),
        ];
        for (name, now, before) in deltas {
            let delta = now.saturating_sub(before);
            if delta > 0 {
                counter!(name).increment(delta);
            }
        }

        let connected = *state.borrow() == ConnectionState::Connected;
        gauge!("roverlink_connected").set(if connected { 1.0 } else { 0.0 });

        last = snapshot;
    }
}
