//! Default reference controller (`name() -> "cubic"`): a straightforward
//! additive-increase/multiplicative-decrease controller used as the
//! baseline against which BBR is compared in reports.

use super::{Controller, Decision, Sample};
use std::time::Duration;

const LOSS_MULTIPLIER: f64 = 0.7;
const BOOTSTRAP_RTT: Duration = Duration::from_millis(10);

pub struct CubicController {
    mtu_bytes: u64,
    cwnd_bytes: u64,
    pacing_bps: f64,
}

impl CubicController {
    pub fn new() -> Self {
        Self {
            mtu_bytes: 1200,
            cwnd_bytes: 32 * 1200,
            pacing_bps: 0.0,
        }
    }

    fn floor(&self) -> u64 {
        2 * self.mtu_bytes
    }

    fn decision(&self) -> Decision {
        Decision {
            cwnd_bytes: self.cwnd_bytes.max(self.floor()),
            pacing_bps: self.pacing_bps,
        }
    }
}

impl Default for CubicController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for CubicController {
    fn init(&mut self, initial_cwnd_bytes: u64, mtu_bytes: u64) {
        self.mtu_bytes = mtu_bytes;
        self.cwnd_bytes = (32 * mtu_bytes).max(initial_cwnd_bytes);
        self.pacing_bps = self.cwnd_bytes as f64 / BOOTSTRAP_RTT.as_secs_f64();
    }

    fn on_ack(&mut self, sample: Sample) -> Decision {
        self.cwnd_bytes = self.cwnd_bytes.saturating_add(sample.bytes_acked);
        let rtt = if sample.rtt > Duration::ZERO {
            sample.rtt
        } else {
            BOOTSTRAP_RTT
        };
        self.pacing_bps = self.cwnd_bytes as f64 / rtt.as_secs_f64();
        self.decision()
    }

    fn on_loss(&mut self, _sample: Sample) -> Decision {
        self.cwnd_bytes = ((self.cwnd_bytes as f64 * LOSS_MULTIPLIER) as u64).max(self.floor());
        self.decision()
    }

    fn name(&self) -> &'static str {
        "cubic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bytes_acked: u64) -> Sample {
        Sample {
            bytes_acked,
            rtt: Duration::from_millis(20),
            loss: false,
            delivered: bytes_acked,
            delivery_rate: 0.0,
        }
    }

    #[test]
    fn cwnd_grows_on_ack_and_shrinks_on_loss() {
        let mut c = CubicController::new();
        c.init(32 * 1200, 1200);
        let before = c.on_ack(sample(1200)).cwnd_bytes;
        let after_loss = c.on_loss(sample(0)).cwnd_bytes;
        assert!(after_loss < before);
        assert!(after_loss >= 2 * 1200);
    }

    #[test]
    fn name_is_cubic() {
        assert_eq!(CubicController::new().name(), "cubic");
    }
}
