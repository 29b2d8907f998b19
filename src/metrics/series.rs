//! Per-second derived-metric time series, bounded by the configured test
//! duration.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DerivedSample {
    pub t_secs: u64,
    pub avg_latency_ms: f64,
    pub throughput_kbps: f64,
    pub loss_pct: f64,
    pub retransmits: u64,
    pub controller_phase: &'static str,
    pub cwnd_bytes: u64,
    pub pacing_bps: f64,
    pub bandwidth_bps: f64,
    pub min_rtt_ms: f64,
}

/// A bounded ring of one-second samples. Capacity defaults to the
/// expected run length so the buffer never grows past a test's duration.
pub struct TimeSeries {
    capacity: usize,
    samples: Mutex<VecDeque<DerivedSample>>,
}

impl TimeSeries {
    pub fn new(capacity_secs: usize) -> Self {
        Self {
            capacity: capacity_secs.max(1),
            samples: Mutex::new(VecDeque::with_capacity(capacity_secs.max(1))),
        }
    }

    pub fn push(&self, sample: DerivedSample) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn snapshot(&self) -> Vec<DerivedSample> {
        self.samples.lock().unwrap().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: u64) -> DerivedSample {
        DerivedSample {
            t_secs: t,
            controller_phase: "startup",
            ..Default::default()
        }
    }

    #[test]
    fn evicts_oldest_once_capacity_is_reached() {
        let ts = TimeSeries::new(3);
        for t in 0..5 {
            ts.push(sample(t));
        }
        let snap = ts.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].t_secs, 2);
        assert_eq!(snap[2].t_secs, 4);
    }

    #[test]
    fn empty_series_is_empty() {
        let ts = TimeSeries::new(10);
        assert!(ts.is_empty());
    }
}
