//! SLA threshold evaluation and the process exit code it drives.

use crate::metrics::MetricsSnapshot;

#[derive(Debug, Clone, Copy, Default)]
pub struct SlaThresholds {
    pub rtt_p95_ms: Option<f64>,
    pub loss_pct: Option<f64>,
    pub throughput_kbps_min: Option<f64>,
    pub errors_max: Option<u64>,
}

impl SlaThresholds {
    pub fn is_configured(&self) -> bool {
        self.rtt_p95_ms.is_some()
            || self.loss_pct.is_some()
            || self.throughput_kbps_min.is_some()
            || self.errors_max.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub name: &'static str,
    pub threshold: f64,
    pub actual: f64,
}

/// Checks every configured threshold against the final snapshot. An
/// unconfigured threshold (`None`) is never violated.
pub fn evaluate(thresholds: &SlaThresholds, snapshot: &MetricsSnapshot) -> Vec<Violation> {
    let mut violations = Vec::new();

    if let Some(limit) = thresholds.rtt_p95_ms {
        let actual = snapshot.latency.p95 as f64 / 1000.0;
        if actual > limit {
            violations.push(Violation {
                name: "sla-rtt-p95",
                threshold: limit,
                actual,
            });
        }
    }

    if let Some(limit) = thresholds.loss_pct {
        let actual = snapshot
            .series
            .last()
            .map(|s| s.loss_pct)
            .unwrap_or(0.0);
        if actual > limit {
            violations.push(Violation {
                name: "sla-loss",
                threshold: limit,
                actual,
            });
        }
    }

    if let Some(floor) = thresholds.throughput_kbps_min {
        let actual = snapshot
            .series
            .last()
            .map(|s| s.throughput_kbps)
            .unwrap_or(0.0);
        if actual < floor {
            violations.push(Violation {
                name: "sla-throughput",
                threshold: floor,
                actual,
            });
        }
    }

    if let Some(limit) = thresholds.errors_max {
        let actual = snapshot.counters.errors_total;
        if actual > limit {
            violations.push(Violation {
                name: "sla-errors",
                threshold: limit as f64,
                actual: actual as f64,
            });
        }
    }

    violations
}

/// 0 if no SLA configured or all thresholds are satisfied, 2 if any are
/// violated.
pub fn exit_code(violations: &[Violation]) -> i32 {
    if violations.is_empty() {
        0
    } else {
        2
    }
}

pub fn print_violations(violations: &[Violation]) {
    for v in violations {
        eprintln!(
            "SLA violated: {} threshold={:.3} actual={:.3}",
            v.name, v.threshold, v.actual
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::series::DerivedSample;

    fn snapshot_with_latency_p95(p95_us: u64) -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::default();
        snap.latency.p95 = p95_us;
        snap
    }

    #[test]
    fn unconfigured_thresholds_never_violate() {
        let snap = snapshot_with_latency_p95(1_000_000);
        let violations = evaluate(&SlaThresholds::default(), &snap);
        assert!(violations.is_empty());
        assert_eq!(exit_code(&violations), 0);
    }

    #[test]
    fn rtt_p95_violation_is_reported_in_milliseconds() {
        let snap = snapshot_with_latency_p95(200_000); // 200ms
        let thresholds = SlaThresholds {
            rtt_p95_ms: Some(50.0),
            ..Default::default()
        };
        let violations = evaluate(&thresholds, &snap);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "sla-rtt-p95");
        assert_eq!(exit_code(&violations), 2);
    }

    #[test]
    fn throughput_floor_violation_when_below_minimum() {
        let mut snap = MetricsSnapshot::default();
        snap.series.push(DerivedSample {
            throughput_kbps: 10.0,
            ..Default::default()
        });
        let thresholds = SlaThresholds {
            throughput_kbps_min: Some(50.0),
            ..Default::default()
        };
        let violations = evaluate(&thresholds, &snap);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "sla-throughput");
    }
}
