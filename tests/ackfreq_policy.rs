//! Wire-encodes an `ACK_FREQUENCY` frame, decodes it back, and feeds it into
//! the receiver policy state machine, crossing the wire/ackfreq boundary
//! the per-module unit tests don't.

use quic_testbench::ackfreq::AckFrequencyState;
use quic_testbench::wire::ack_frequency::{self, AckFrequencyFrame};
use std::time::Duration;

#[test]
fn a_frame_received_over_the_wire_changes_the_receiver_policy() {
    let sent = AckFrequencyFrame {
        sequence_number: 1,
        ack_eliciting_threshold: 4,
        requested_max_ack_delay_ms: 10,
        reordering_threshold: 0,
    };
    let mut wire = Vec::new();
    sent.encode(&mut wire).unwrap();

    let (received, _) = AckFrequencyFrame::decode(&wire).unwrap();
    let mut state = AckFrequencyState::new(Duration::from_millis(25));
    state.apply_ack_frequency(&received);

    for i in 0..3 {
        assert!(!state.on_ack_eliciting_packet(i));
    }
    assert!(state.on_ack_eliciting_packet(3));
}

#[test]
fn immediate_ack_byte_on_the_wire_forces_the_next_poll() {
    let mut wire = Vec::new();
    ack_frequency::encode_immediate_ack(&mut wire);
    assert!(ack_frequency::is_immediate_ack(&wire));

    let mut state = AckFrequencyState::new(Duration::from_secs(1));
    state.note_immediate_ack();
    assert!(state.poll());
}
