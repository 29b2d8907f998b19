//! Periodic derived-sample task: once a second, turns the raw counters and
//! histograms into a rate-based [`DerivedSample`] and pushes it into the
//! store's time series, which the exporter, bridge, and SLA checks all
//! read from.

use super::series::DerivedSample;
use super::{CounterSnapshot, MetricsStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn derive(snap: &super::MetricsSnapshot, prev: Option<CounterSnapshot>, store: &MetricsStore, t_secs: u64) -> DerivedSample {
    let counters = snap.counters;
    let (throughput_kbps, loss_pct, retransmits) = match prev {
        Some(p) => {
            let bytes_delta = counters.bytes_sent.saturating_sub(p.bytes_sent);
            let packets_delta = counters.packets_sent.saturating_sub(p.packets_sent);
            let errors_delta = counters.errors_total.saturating_sub(p.errors_total);
            let throughput_kbps = bytes_delta as f64 * 8.0 / 1000.0;
            let loss_pct = if packets_delta > 0 {
                errors_delta as f64 / packets_delta as f64 * 100.0
            } else {
                0.0
            };
            let retransmits = counters.retransmits.saturating_sub(p.retransmits);
            (throughput_kbps, loss_pct, retransmits)
        }
        None => (0.0, 0.0, 0),
    };

    DerivedSample {
        t_secs,
        avg_latency_ms: snap.latency.mean / 1000.0,
        throughput_kbps,
        loss_pct,
        retransmits,
        controller_phase: store.controller_phase(),
        cwnd_bytes: store.cwnd_bytes(),
        pacing_bps: store.pacing_bps(),
        bandwidth_bps: throughput_kbps * 1000.0,
        min_rtt_ms: if snap.latency.count > 0 {
            snap.latency.min as f64 / 1000.0
        } else {
            0.0
        },
    }
}

/// Runs until `cancel` fires, pushing one [`DerivedSample`] into `store`
/// every second.
pub async fn run(store: Arc<MetricsStore>, start: Instant, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut prev: Option<CounterSnapshot> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                let snap = store.snapshot();
                let sample = derive(&snap, prev, &store, start.elapsed().as_secs());
                prev = Some(snap.counters);
                store.push_sample(sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_has_no_deltas_to_compare_against() {
        let store = MetricsStore::new(10);
        let snap = store.snapshot();
        let sample = derive(&snap, None, &store, 0);
        assert_eq!(sample.throughput_kbps, 0.0);
        assert_eq!(sample.loss_pct, 0.0);
    }

    #[test]
    fn throughput_reflects_bytes_sent_since_previous_sample() {
        let store = MetricsStore::new(10);
        let prev = store.snapshot().counters;
        store.add_bytes_sent(1250);
        let snap = store.snapshot();
        let sample = derive(&snap, Some(prev), &store, 1);
        assert_eq!(sample.throughput_kbps, 1250.0 * 8.0 / 1000.0);
    }
}
