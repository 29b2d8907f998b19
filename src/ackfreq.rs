//! ACK-frequency receiver policy: decides when the receiver must emit an
//! ACK, honoring a peer-advertised `min_ack_delay` and an immediate-ACK
//! trigger.

use crate::wire::ack_frequency::AckFrequencyFrame;
use std::time::{Duration, Instant};

const DEFAULT_ACK_ELICITING_THRESHOLD: u64 = 2;
const DEFAULT_REORDERING_THRESHOLD: u64 = 1;

/// Per-receiver ACK-frequency state.
pub struct AckFrequencyState {
    last_sequence_number: u64,
    ack_eliciting_threshold: u64,
    requested_max_ack_delay: Duration,
    reordering_threshold: u64,
    min_ack_delay_from_peer: Option<Duration>,
    ack_eliciting_since_last_ack: u64,
    force_immediate: bool,
    last_ack_time: Instant,
    highest_packet_number_seen: Option<u64>,
    have_received_frame: bool,
}

impl AckFrequencyState {
    pub fn new(default_max_ack_delay: Duration) -> Self {
        Self {
            last_sequence_number: 0,
            ack_eliciting_threshold: DEFAULT_ACK_ELICITING_THRESHOLD,
            requested_max_ack_delay: default_max_ack_delay,
            reordering_threshold: DEFAULT_REORDERING_THRESHOLD,
            min_ack_delay_from_peer: None,
            ack_eliciting_since_last_ack: 0,
            force_immediate: false,
            last_ack_time: Instant::now(),
            highest_packet_number_seen: None,
            have_received_frame: false,
        }
    }

    /// Records the peer's advertised `min_ack_delay` transport parameter.
    pub fn set_peer_min_ack_delay(&mut self, delay: Duration) {
        self.min_ack_delay_from_peer = Some(delay);
    }

    pub fn peer_advertised_min_ack_delay(&self) -> bool {
        self.min_ack_delay_from_peer
            .map(|d| d > Duration::ZERO)
            .unwrap_or(false)
    }

    /// Applies a received `ACK_FREQUENCY` frame, ignoring stale sequence
    /// numbers (only a strictly newer sequence number takes effect).
    pub fn apply_ack_frequency(&mut self, frame: &AckFrequencyFrame) {
        if self.have_received_frame && frame.sequence_number <= self.last_sequence_number {
            return;
        }
        self.have_received_frame = true;
        self.last_sequence_number = frame.sequence_number;
        self.ack_eliciting_threshold = frame.ack_eliciting_threshold;
        let requested = Duration::from_millis(frame.requested_max_ack_delay_ms);
        self.requested_max_ack_delay = match self.min_ack_delay_from_peer {
            Some(min) if requested < min => min,
            _ => requested,
        };
        self.reordering_threshold = frame.reordering_threshold;
    }

    /// A peer-sent `IMMEDIATE_ACK` arrived: force an ACK on the next poll.
    pub fn note_immediate_ack(&mut self) {
        self.force_immediate = true;
    }

    /// Call on every incoming ACK-eliciting packet.
    pub fn on_ack_eliciting_packet(&mut self, packet_number: u64) -> bool {
        self.ack_eliciting_since_last_ack += 1;
        let reordered = match self.highest_packet_number_seen {
            Some(highest) if packet_number + self.reordering_threshold < highest => true,
            _ => false,
        };
        self.highest_packet_number_seen = Some(
            self.highest_packet_number_seen
                .map_or(packet_number, |h| h.max(packet_number)),
        );
        self.should_ack_now(reordered)
    }

    /// Call on a periodic timer even without new packets, to catch the
    /// max-ack-delay expiry case.
    pub fn poll(&mut self) -> bool {
        self.should_ack_now(false)
    }

    fn should_ack_now(&mut self, large_gap_detected: bool) -> bool {
        if self.force_immediate {
            self.force_immediate = false;
            self.mark_acked();
            return true;
        }
        if self.ack_eliciting_since_last_ack >= self.ack_eliciting_threshold {
            self.mark_acked();
            return true;
        }
        if self.ack_eliciting_since_last_ack > 0
            && self.last_ack_time.elapsed() >= self.requested_max_ack_delay
        {
            self.mark_acked();
            return true;
        }
        if self.reordering_threshold > 1 && large_gap_detected {
            self.mark_acked();
            return true;
        }
        false
    }

    fn mark_acked(&mut self) {
        self.ack_eliciting_since_last_ack = 0;
        self.last_ack_time = Instant::now();
    }

    pub fn effective_max_ack_delay(&self) -> Duration {
        self.requested_max_ack_delay
    }
}
