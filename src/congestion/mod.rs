//! Pluggable congestion-control surface.
//!
//! A small trait plus a process-wide factory, consulted once per
//! connection at init time. No per-packet dynamic dispatch beyond the one
//! virtual call per ACK/loss event.

pub mod bbr;
pub mod cubic;

use std::time::Duration;

/// One observation fed to the controller, taken from the transport's ACK
/// or loss-detection path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sample {
    pub bytes_acked: u64,
    pub rtt: Duration,
    pub loss: bool,
    pub delivered: u64,
    pub delivery_rate: f64,
}

/// cwnd/pacing decision returned from every controller call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub cwnd_bytes: u64,
    pub pacing_bps: f64,
}

pub trait Controller: Send {
    fn init(&mut self, initial_cwnd_bytes: u64, mtu_bytes: u64);
    fn on_ack(&mut self, sample: Sample) -> Decision;
    fn on_loss(&mut self, sample: Sample) -> Decision;
    fn name(&self) -> &'static str;

    /// Current internal phase, for controllers that track one (BBR's
    /// Startup/Drain/ProbeBw/ProbeRtt). Controllers without phases report
    /// `"n/a"`.
    fn phase(&self) -> &'static str {
        "n/a"
    }
}

/// Process-wide factory selecting a controller by name at connection init.
pub fn make_controller(name: &str) -> Option<Box<dyn Controller>> {
    match name {
        "bbrv2" => Some(Box::new(bbr::BbrController::new(bbr::Variant::V2))),
        "bbrv3" => Some(Box::new(bbr::BbrController::new(bbr::Variant::V3))),
        "cubic" => Some(Box::new(cubic::CubicController::new())),
        _ => None,
    }
}
