//! BBRv2/BBRv3 state machine.
//!
//! The two variants share this implementation; they differ only in the
//! name they report, treating them as configuration of the same model
//! rather than distinct codebases.

use super::{Controller, Decision, Sample};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

const STARTUP_PACING_GAIN: f64 = 2.0;
const DRAIN_PACING_GAIN: f64 = 0.5;
const PROBE_BW_GAINS: [f64; 4] = [1.25, 1.0, 0.75, 1.0];
const PROBE_BW_CYCLE: Duration = Duration::from_millis(300);
const DRAIN_HOLD: Duration = Duration::from_millis(500);
const STARTUP_GROWTH_WINDOW: Duration = Duration::from_secs(2);
const MIN_RTT_FRESHNESS: Duration = Duration::from_secs(5);
const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);
const LOSS_MULTIPLIER: f64 = 0.7;
const BOOTSTRAP_RTT: Duration = Duration::from_millis(10);

pub struct BbrController {
    variant: Variant,
    mtu_bytes: u64,
    cwnd_bytes: u64,
    pacing_bps: f64,
    min_rtt: Duration,
    min_rtt_last_updated: Instant,
    bandwidth_estimate: f64,
    phase: Phase,
    phase_entered: Instant,
    probe_bw_cycle_index: usize,
    probe_bw_last_advance: Instant,
    startup_bw_at_window_start: f64,
}

impl BbrController {
    pub fn new(variant: Variant) -> Self {
        let now = Instant::now();
        Self {
            variant,
            mtu_bytes: 1200,
            cwnd_bytes: 32 * 1200,
            pacing_bps: 0.0,
            min_rtt: Duration::MAX,
            min_rtt_last_updated: now,
            bandwidth_estimate: 0.0,
            phase: Phase::Startup,
            phase_entered: now,
            probe_bw_cycle_index: 0,
            probe_bw_last_advance: now,
            startup_bw_at_window_start: 0.0,
        }
    }

    fn bdp(&self) -> u64 {
        if self.min_rtt == Duration::MAX || self.bandwidth_estimate <= 0.0 {
            return self.cwnd_bytes;
        }
        (self.bandwidth_estimate * self.min_rtt.as_secs_f64()) as u64
    }

    fn floor(&self) -> u64 {
        2 * self.mtu_bytes
    }

    fn update_estimates(&mut self, sample: Sample) {
        let rate = if sample.delivery_rate > 0.0 {
            sample.delivery_rate
        } else if sample.rtt > Duration::ZERO {
            sample.bytes_acked as f64 / sample.rtt.as_secs_f64()
        } else {
            0.0
        };
        if rate > self.bandwidth_estimate {
            self.bandwidth_estimate = rate;
        }

        if sample.rtt > Duration::ZERO && sample.rtt < self.min_rtt {
            self.min_rtt = sample.rtt;
            self.min_rtt_last_updated = Instant::now();
        }
    }

    fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_entered = Instant::now();
        if phase == Phase::ProbeBw {
            self.probe_bw_cycle_index = 0;
            self.probe_bw_last_advance = Instant::now();
        }
        if phase == Phase::Startup {
            self.startup_bw_at_window_start = self.bandwidth_estimate;
        }
    }

    fn decision(&self) -> Decision {
        Decision {
            cwnd_bytes: self.cwnd_bytes.max(self.floor()),
            pacing_bps: self.pacing_bps,
        }
    }

    fn run_phase(&mut self, sample: Sample) {
        let now = Instant::now();
        match self.phase {
            Phase::Startup => {
                self.cwnd_bytes = self.cwnd_bytes.saturating_add(sample.bytes_acked);
                self.pacing_bps = STARTUP_PACING_GAIN * self.bandwidth_estimate.max(1.0);
                if now.duration_since(self.phase_entered) > STARTUP_GROWTH_WINDOW {
                    if self.bandwidth_estimate <= self.startup_bw_at_window_start * 1.25 {
                        self.transition(Phase::Drain);
                    } else {
                        self.startup_bw_at_window_start = self.bandwidth_estimate;
                        self.phase_entered = now;
                    }
                }
            }
            Phase::Drain => {
                self.cwnd_bytes = self.bdp();
                self.pacing_bps = DRAIN_PACING_GAIN * self.bandwidth_estimate;
                if now.duration_since(self.phase_entered) > DRAIN_HOLD {
                    self.transition(Phase::ProbeBw);
                }
            }
            Phase::ProbeBw => {
                if now.duration_since(self.probe_bw_last_advance) > PROBE_BW_CYCLE {
                    self.probe_bw_cycle_index = (self.probe_bw_cycle_index + 1) % PROBE_BW_GAINS.len();
                    self.probe_bw_last_advance = now;
                }
                let gain = PROBE_BW_GAINS[self.probe_bw_cycle_index];
                self.pacing_bps = gain * self.bandwidth_estimate;
                self.cwnd_bytes = ((gain * self.bdp() as f64) as u64).max(self.floor());
                if now.duration_since(self.min_rtt_last_updated) > MIN_RTT_FRESHNESS {
                    self.transition(Phase::ProbeRtt);
                }
            }
            Phase::ProbeRtt => {
                self.cwnd_bytes = ((0.5 * self.bdp() as f64) as u64).max(self.floor());
                if now.duration_since(self.phase_entered) > PROBE_RTT_DURATION {
                    self.min_rtt_last_updated = now;
                    self.transition(Phase::ProbeBw);
                }
            }
        }
    }
}

impl Controller for BbrController {
    fn init(&mut self, initial_cwnd_bytes: u64, mtu_bytes: u64) {
        self.mtu_bytes = mtu_bytes;
        self.cwnd_bytes = (32 * mtu_bytes).max(initial_cwnd_bytes);
        self.pacing_bps = self.cwnd_bytes as f64 / BOOTSTRAP_RTT.as_secs_f64();
        self.phase = Phase::Startup;
        self.phase_entered = Instant::now();
        self.min_rtt = Duration::MAX;
        self.min_rtt_last_updated = Instant::now();
        self.bandwidth_estimate = 0.0;
        self.startup_bw_at_window_start = 0.0;
    }

    fn on_ack(&mut self, sample: Sample) -> Decision {
        self.update_estimates(sample);
        self.run_phase(sample);
        self.decision()
    }

    fn on_loss(&mut self, sample: Sample) -> Decision {
        self.update_estimates(sample);
        self.cwnd_bytes = ((self.cwnd_bytes as f64 * LOSS_MULTIPLIER) as u64).max(self.floor());
        if self.bandwidth_estimate > 0.0 {
            self.pacing_bps = self.bandwidth_estimate;
        }
        self.decision()
    }

    fn name(&self) -> &'static str {
        match self.variant {
            Variant::V2 => "bbrv2",
            Variant::V3 => "bbrv3",
        }
    }

    fn phase(&self) -> &'static str {
        match self.phase {
            Phase::Startup => "startup",
            Phase::Drain => "drain",
            Phase::ProbeBw => "probe_bw",
            Phase::ProbeRtt => "probe_rtt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bytes_acked: u64, rtt_ms: u64) -> Sample {
        Sample {
            bytes_acked,
            rtt: Duration::from_millis(rtt_ms),
            loss: false,
            delivered: bytes_acked,
            delivery_rate: 0.0,
        }
    }

    #[test]
    fn cwnd_is_non_decreasing_in_startup_without_loss() {
        let mut bbr = BbrController::new(Variant::V2);
        bbr.init(32 * 1200, 1200);
        let mut last = bbr.decision().cwnd_bytes;
        for _ in 0..20 {
            let d = bbr.on_ack(sample(1200, 20));
            assert!(d.cwnd_bytes >= last, "cwnd decreased during startup");
            last = d.cwnd_bytes;
        }
    }

    #[test]
    fn loss_floor_is_two_times_mtu() {
        let mut bbr = BbrController::new(Variant::V3);
        bbr.init(32 * 1200, 1200);
        for _ in 0..50 {
            bbr.on_loss(sample(0, 20));
        }
        assert!(bbr.decision().cwnd_bytes >= 2 * 1200);
    }

    #[test]
    fn name_reflects_variant() {
        assert_eq!(BbrController::new(Variant::V2).name(), "bbrv2");
        assert_eq!(BbrController::new(Variant::V3).name(), "bbrv3");
    }

    #[test]
    fn sustained_startup_eventually_drains() {
        let mut bbr = BbrController::new(Variant::V2);
        bbr.init(32 * 1200, 1200);
        // Feed acks with a constant delivery rate for longer than the
        // startup growth window so bandwidth growth is seen as stalled.
        for _ in 0..5 {
            bbr.on_ack(Sample {
                bytes_acked: 1200,
                rtt: Duration::from_millis(20),
                loss: false,
                delivered: 1200,
                delivery_rate: 1_000_000.0,
            });
        }
        bbr.phase_entered = Instant::now() - Duration::from_secs(3);
        let before = bbr.phase;
        bbr.on_ack(Sample {
            bytes_acked: 1200,
            rtt: Duration::from_millis(20),
            loss: false,
            delivered: 1200,
            delivery_rate: 1_000_000.0,
        });
        assert_eq!(before, Phase::Startup);
        assert_eq!(bbr.phase, Phase::Drain);
    }
}
