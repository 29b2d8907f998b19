//! End-to-end encoder -> wire -> decoder recovery, exercising the public
//! API boundary the unit tests inside each module don't cross.

use quic_testbench::fec::decoder::FecDecoder;
use quic_testbench::fec::encoder::FecEncoder;
use quic_testbench::fec::FecConfig;
use quic_testbench::wire::repair;

fn cfg() -> FecConfig {
    FecConfig {
        redundancy: 1.0,
        group_size: 4,
        ..FecConfig::default()
    }
}

#[test]
fn decoder_recovers_a_packet_dropped_on_the_wire() {
    let mut enc = FecEncoder::new(cfg());
    let dec = FecDecoder::new(cfg());

    let packets: Vec<Vec<u8>> = (0..4u64).map(|i| vec![i as u8; 64]).collect();
    let mut repair_wire = None;
    for (i, payload) in packets.iter().enumerate() {
        if let Some(wire) = enc.add_packet(payload, i as u64) {
            repair_wire = Some(wire);
        }
    }
    let repair_wire = repair_wire.expect("full group of 4 at redundancy 1.0 emits a repair");
    let (header, symbol) = repair::decode(&repair_wire).unwrap();
    assert_eq!(header.group_id, 0);

    // Slot 2 is "lost" on the wire: every other data slot plus the repair
    // symbol arrive at the decoder.
    assert!(dec.add_data_packet(header.group_id, 0, header.k, &packets[0]).is_none());
    assert!(dec.add_data_packet(header.group_id, 1, header.k, &packets[1]).is_none());
    assert!(dec.add_data_packet(header.group_id, 3, header.k, &packets[3]).is_none());
    let recovered = dec
        .add_repair_packet(header.group_id, header.k, symbol)
        .expect("single missing slot recovers");

    assert_eq!(recovered.slot, 2);
    assert_eq!(recovered.payload, packets[2]);
    assert_eq!(dec.metrics().packets_recovered, 1);
}

#[test]
fn low_redundancy_groups_without_a_repair_symbol_are_unrecoverable_on_loss() {
    let low_redundancy = FecConfig {
        redundancy: 0.02,
        group_size: 2,
        ..FecConfig::default()
    };
    let mut enc = FecEncoder::new(low_redundancy);
    let dec = FecDecoder::new(low_redundancy);

    // r=0.02 with defaults emits a repair only once every 5 groups; the
    // very first group (index 0) still emits since group_index % n == 0,
    // so skip ahead to a group that will be silently dropped.
    let mut last_repair = None;
    for g in 0..2u64 {
        for slot in 0..2u64 {
            let id = g * 2 + slot;
            last_repair = enc.add_packet(&[id as u8; 16], id).or(last_repair);
        }
    }
    assert!(last_repair.is_some(), "group 0 always emits at any redundancy");

    // Group 1's repair was skipped by the emission policy: the decoder
    // never receives one, so a single lost slot is never recovered.
    assert!(dec.add_data_packet(1, 0, 2, &[2u8; 16]).is_none());
    assert_eq!(dec.metrics().packets_recovered, 0);
}
