//! Process-wide metrics singleton: counters, HDR histograms, and the
//! derived-sample time series, shared by every other component through a
//! stable handle rather than owning back-references.

pub mod bridge;
pub mod exporter;
pub mod histogram;
pub mod sampler;
pub mod series;

use histogram::{BoundedHistogram, HistogramSnapshot};
use prometheus::{
    core::Collector, register_int_counter, register_int_counter_vec, register_int_gauge,
    IntCounter, IntCounterVec, IntGauge,
};
use serde::Serialize;
use series::{DerivedSample, TimeSeries};
use std::sync::{Arc, OnceLock};

const MAX_LATENCY_US: u64 = 60_000_000;
const MAX_THROUGHPUT_BPS: u64 = 100_000_000_000;

lazy_static::lazy_static! {
    static ref PACKETS_SENT: IntCounter =
        register_int_counter!("quic_packets_sent_total", "Packets sent").unwrap();
    static ref PACKETS_RECEIVED: IntCounter =
        register_int_counter!("quic_packets_received_total", "Packets received").unwrap();
    static ref BYTES_SENT: IntCounter =
        register_int_counter!("quic_bytes_sent_total", "Bytes sent").unwrap();
    static ref BYTES_RECEIVED: IntCounter =
        register_int_counter!("quic_bytes_received_total", "Bytes received").unwrap();
    static ref RETRANSMITS: IntCounter =
        register_int_counter!("quic_retransmits_total", "Retransmitted packets").unwrap();
    static ref ERRORS_BY_KIND: IntCounterVec = register_int_counter_vec!(
        "quic_errors_total",
        "Errors observed, by taxonomy label",
        &["kind"]
    )
    .unwrap();
    static ref HANDSHAKES: IntCounter =
        register_int_counter!("quic_handshakes_total", "Completed handshakes").unwrap();
    static ref ZERO_RTT: IntCounter =
        register_int_counter!("quic_zero_rtt_total", "0-RTT handshakes").unwrap();
    static ref ONE_RTT: IntCounter =
        register_int_counter!("quic_one_rtt_total", "1-RTT handshakes").unwrap();
    static ref SESSION_RESUMPTIONS: IntCounter = register_int_counter!(
        "quic_session_resumptions_total",
        "TLS session resumptions"
    )
    .unwrap();
    static ref FEC_PACKETS_SENT: IntCounter = register_int_counter!(
        "quic_fec_packets_sent_total",
        "Packets fed to the FEC encoder"
    )
    .unwrap();
    static ref FEC_REPAIR_SENT: IntCounter =
        register_int_counter!("quic_fec_repair_sent_total", "Repair packets emitted").unwrap();
    static ref FEC_REPAIR_RECEIVED: IntCounter = register_int_counter!(
        "quic_fec_repair_received_total",
        "Repair packets received"
    )
    .unwrap();
    static ref FEC_RECOVERED: IntCounter = register_int_counter!(
        "quic_fec_recovered_total",
        "Packets recovered by the FEC decoder"
    )
    .unwrap();
    static ref FEC_RECOVERY_FAILED: IntCounter = register_int_counter!(
        "quic_fec_recovery_failed_total",
        "FEC groups with two or more losses"
    )
    .unwrap();
    static ref CWND_BYTES: IntGauge =
        register_int_gauge!("quic_cwnd_bytes", "Latest congestion window").unwrap();
    static ref PACING_BPS: IntGauge =
        register_int_gauge!("quic_pacing_bps", "Latest pacing rate in bits per second").unwrap();
    static ref CONTROLLER_PHASE: std::sync::Mutex<&'static str> =
        std::sync::Mutex::new("n/a");
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CounterSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmits: u64,
    pub handshakes: u64,
    pub zero_rtt: u64,
    pub one_rtt: u64,
    pub session_resumptions: u64,
    pub fec_packets_sent: u64,
    pub fec_repair_sent: u64,
    pub fec_repair_received: u64,
    pub fec_recovered: u64,
    pub fec_recovery_failed: u64,
    pub errors_total: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: CounterSnapshot,
    pub latency: HistogramSnapshot,
    pub jitter: HistogramSnapshot,
    pub handshake: HistogramSnapshot,
    pub throughput: HistogramSnapshot,
    pub series: Vec<DerivedSample>,
}

/// The metrics core. One instance per process; reached through [`global`]
/// by the client engine, server engine, exporter, and bridge.
pub struct MetricsStore {
    latency: BoundedHistogram,
    jitter: BoundedHistogram,
    handshake: BoundedHistogram,
    throughput: BoundedHistogram,
    series: TimeSeries,
}

impl MetricsStore {
    pub fn new(series_capacity_secs: usize) -> Self {
        Self {
            latency: BoundedHistogram::new(MAX_LATENCY_US),
            jitter: BoundedHistogram::new(MAX_LATENCY_US),
            handshake: BoundedHistogram::new(MAX_LATENCY_US),
            throughput: BoundedHistogram::new(MAX_THROUGHPUT_BPS),
            series: TimeSeries::new(series_capacity_secs),
        }
    }

    pub fn record_latency(&self, micros: u64) {
        self.latency.record(micros);
    }

    pub fn record_jitter(&self, micros: u64) {
        self.jitter.record(micros);
    }

    pub fn record_handshake(&self, micros: u64) {
        self.handshake.record(micros);
    }

    pub fn record_throughput(&self, bps: u64) {
        self.throughput.record(bps);
    }

    pub fn inc_packets_sent(&self) {
        PACKETS_SENT.inc();
    }

    pub fn inc_packets_received(&self) {
        PACKETS_RECEIVED.inc();
    }

    pub fn add_bytes_sent(&self, n: u64) {
        BYTES_SENT.inc_by(n);
    }

    pub fn add_bytes_received(&self, n: u64) {
        BYTES_RECEIVED.inc_by(n);
    }

    pub fn inc_retransmits(&self) {
        RETRANSMITS.inc();
    }

    /// Increments the generic error total and the per-kind counter.
    pub fn inc_error(&self, kind: &str) {
        ERRORS_BY_KIND.with_label_values(&[kind]).inc();
    }

    pub fn inc_handshake(&self) {
        HANDSHAKES.inc();
    }

    pub fn inc_zero_rtt(&self) {
        ZERO_RTT.inc();
    }

    pub fn inc_one_rtt(&self) {
        ONE_RTT.inc();
    }

    pub fn inc_session_resumption(&self) {
        SESSION_RESUMPTIONS.inc();
    }

    pub fn inc_fec_packets_sent(&self) {
        FEC_PACKETS_SENT.inc();
    }

    pub fn inc_fec_repair_sent(&self) {
        FEC_REPAIR_SENT.inc();
    }

    pub fn inc_fec_repair_received(&self) {
        FEC_REPAIR_RECEIVED.inc();
    }

    pub fn inc_fec_recovered(&self) {
        FEC_RECOVERED.inc();
    }

    pub fn inc_fec_recovery_failed(&self) {
        FEC_RECOVERY_FAILED.inc();
    }

    pub fn set_cwnd_bytes(&self, v: u64) {
        CWND_BYTES.set(v as i64);
    }

    pub fn set_pacing_bps(&self, v: f64) {
        PACING_BPS.set(v as i64);
    }

    pub fn cwnd_bytes(&self) -> u64 {
        CWND_BYTES.get() as u64
    }

    pub fn pacing_bps(&self) -> f64 {
        PACING_BPS.get() as f64
    }

    pub fn set_controller_phase(&self, phase: &'static str) {
        *CONTROLLER_PHASE.lock().unwrap() = phase;
    }

    pub fn controller_phase(&self) -> &'static str {
        *CONTROLLER_PHASE.lock().unwrap()
    }

    pub fn push_sample(&self, sample: DerivedSample) {
        self.series.push(sample);
    }

    fn errors_total(&self) -> u64 {
        ERRORS_BY_KIND
            .collect()
            .iter()
            .flat_map(|mf| mf.get_metric())
            .map(|m| m.get_counter().get_value() as u64)
            .sum()
    }

    /// A deep-copied snapshot, safe to read without holding any lock.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: CounterSnapshot {
                packets_sent: PACKETS_SENT.get(),
                packets_received: PACKETS_RECEIVED.get(),
                bytes_sent: BYTES_SENT.get(),
                bytes_received: BYTES_RECEIVED.get(),
                retransmits: RETRANSMITS.get(),
                handshakes: HANDSHAKES.get(),
                zero_rtt: ZERO_RTT.get(),
                one_rtt: ONE_RTT.get(),
                session_resumptions: SESSION_RESUMPTIONS.get(),
                fec_packets_sent: FEC_PACKETS_SENT.get(),
                fec_repair_sent: FEC_REPAIR_SENT.get(),
                fec_repair_received: FEC_REPAIR_RECEIVED.get(),
                fec_recovered: FEC_RECOVERED.get(),
                fec_recovery_failed: FEC_RECOVERY_FAILED.get(),
                errors_total: self.errors_total(),
            },
            latency: self.latency.snapshot(),
            jitter: self.jitter.snapshot(),
            handshake: self.handshake.snapshot(),
            throughput: self.throughput.snapshot(),
            series: self.series.snapshot(),
        }
    }
}

static GLOBAL: OnceLock<Arc<MetricsStore>> = OnceLock::new();

/// Returns the process-wide metrics handle, creating it on first use with
/// room for `series_capacity_secs` seconds of history.
pub fn global(series_capacity_secs: usize) -> Arc<MetricsStore> {
    GLOBAL
        .get_or_init(|| Arc::new(MetricsStore::new(series_capacity_secs)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_values() {
        let store = MetricsStore::new(60);
        store.inc_packets_sent();
        store.inc_packets_sent();
        store.add_bytes_sent(1500);
        store.record_latency(20_000);
        let snap = store.snapshot();
        assert!(snap.counters.packets_sent >= 2);
        assert!(snap.counters.bytes_sent >= 1500);
        assert_eq!(snap.latency.count, 1);
    }

    #[test]
    fn error_counter_is_labeled_by_kind() {
        let store = MetricsStore::new(10);
        store.inc_error("flow_control");
        store.inc_error("flow_control");
        store.inc_error("stream_write");
        assert!(store.snapshot().counters.errors_total >= 3);
    }
}
