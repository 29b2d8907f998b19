//! HDR (high dynamic range) histogram wrapper: fixed value range, 3
//! significant digits of precision, O(1) record/quantile.
//!
//! `prometheus::Histogram` is deliberately not used here: its buckets are
//! fixed at registration time and don't support arbitrary quantile
//! queries, which the latency/jitter/handshake/throughput contracts need.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

/// A fixed-range histogram safe for concurrent recorders and one
/// concurrent snapshot reader.
pub struct BoundedHistogram {
    inner: Mutex<Histogram<u64>>,
}

impl BoundedHistogram {
    /// `max_value` bounds the recordable range; values above it are
    /// clamped rather than rejected, since a dropped sample would violate
    /// the "never panic" contract.
    pub fn new(max_value: u64) -> Self {
        let high = max_value.max(2);
        let hist = Histogram::new_with_bounds(1, high, 3).expect("valid HDR bounds");
        Self {
            inner: Mutex::new(hist),
        }
    }

    pub fn record(&self, value: u64) {
        let mut hist = self.inner.lock().unwrap();
        let high = hist.high();
        let clamped = value.clamp(1, high);
        let _ = hist.record(clamped);
    }

    /// Deep-copies the current state so callers may read freely without
    /// holding the lock.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let hist = self.inner.lock().unwrap();
        if hist.len() == 0 {
            return HistogramSnapshot::default();
        }
        HistogramSnapshot {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_yields_zero_stats_without_panicking() {
        let h = BoundedHistogram::new(60_000_000);
        let snap = h.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.min, 0);
        assert_eq!(snap.max, 0);
        assert_eq!(snap.mean, 0.0);
    }

    #[test]
    fn records_and_reports_quantiles() {
        let h = BoundedHistogram::new(60_000_000);
        for v in 1..=1000u64 {
            h.record(v);
        }
        let snap = h.snapshot();
        assert_eq!(snap.count, 1000);
        assert!(snap.p50 > 0 && snap.p50 < 1000);
        assert!(snap.p99 >= snap.p50);
    }

    #[test]
    fn out_of_range_values_are_clamped_not_dropped() {
        let h = BoundedHistogram::new(1000);
        h.record(u64::MAX);
        assert_eq!(h.snapshot().count, 1);
    }
}
