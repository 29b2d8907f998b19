//! Metrics bridge: once a second, POSTs a compact derived snapshot to an
//! external observer at `POST /api/metrics`.

use super::MetricsStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct ObserverPayload {
    timestamp: u64,
    latency: f64,
    throughput: f64,
    connections: u32,
    errors: u64,
    packet_loss: f64,
    retransmits: u64,
    jitter: f64,
    congestion_window: u64,
    rtt: f64,
    bytes_received: u64,
    bytes_sent: u64,
    streams: u32,
    handshake_time: f64,
}

fn build_payload(store: &MetricsStore, connections: u32, streams: u32, now_secs: u64) -> ObserverPayload {
    let snap = store.snapshot();
    let latest = snap.series.last().copied();
    ObserverPayload {
        timestamp: now_secs,
        latency: snap.latency.mean / 1000.0,
        throughput: latest.map(|s| s.throughput_kbps).unwrap_or(0.0),
        connections,
        errors: snap.counters.errors_total,
        packet_loss: latest.map(|s| s.loss_pct).unwrap_or(0.0),
        retransmits: snap.counters.retransmits,
        jitter: snap.jitter.mean / 1000.0,
        congestion_window: latest.map(|s| s.cwnd_bytes).unwrap_or(0),
        rtt: latest.map(|s| s.min_rtt_ms).unwrap_or(0.0),
        bytes_received: snap.counters.bytes_received,
        bytes_sent: snap.counters.bytes_sent,
        streams,
        handshake_time: snap.handshake.mean / 1000.0,
    }
}

/// Runs until `cancel` fires. A failed POST is logged and dropped, never
/// retried inline, so the bridge can never back up the metrics store.
pub async fn run(
    store: Arc<MetricsStore>,
    observer_url: String,
    connections: u32,
    streams: u32,
    start: std::time::Instant,
    cancel: CancellationToken,
) {
    let client = reqwest::Client::new();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                let now_secs = start.elapsed().as_secs();
                let payload = build_payload(&store, connections, streams, now_secs);
                match client.post(&observer_url).json(&payload).send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        log::warn!("metrics bridge: observer returned {}", resp.status());
                    }
                    Err(e) => log::warn!("metrics bridge: post failed: {e}"),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_expected_field_names() {
        let store = MetricsStore::new(10);
        let payload = build_payload(&store, 1, 1, 5);
        let json = serde_json::to_value(&payload).unwrap();
        for field in [
            "timestamp",
            "latency",
            "throughput",
            "connections",
            "errors",
            "packet_loss",
            "retransmits",
            "jitter",
            "congestion_window",
            "rtt",
            "bytes_received",
            "bytes_sent",
            "streams",
            "handshake_time",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
