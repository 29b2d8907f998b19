//! FEC encoder: groups packets of size k and emits one XOR repair symbol
//! per group, subject to the redundancy-ratio emission policy.

use super::simd;
use super::{FecConfig, MAX_MTU};
use crate::wire::repair;
use aligned_box::AlignedBox;
use std::sync::atomic::{AtomicU64, Ordering};

const REPAIR_ALIGN: usize = 64;

#[derive(Debug, Default)]
pub struct FecEncoderMetrics {
    pub groups_closed: AtomicU64,
    pub fec_packets_sent: AtomicU64,
    pub fec_repair_sent: AtomicU64,
}

impl FecEncoderMetrics {
    fn snapshot(&self) -> FecEncoderMetricsSnapshot {
        FecEncoderMetricsSnapshot {
            groups_closed: self.groups_closed.load(Ordering::Relaxed),
            fec_packets_sent: self.fec_packets_sent.load(Ordering::Relaxed),
            fec_repair_sent: self.fec_repair_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FecEncoderMetricsSnapshot {
    pub groups_closed: u64,
    pub fec_packets_sent: u64,
    pub fec_repair_sent: u64,
}

/// A flat slab holding up to `k` symbol slots, laid out contiguously so the
/// SIMD kernel can address each payload by a fixed stride.
struct Slab {
    buf: AlignedBox<[u8]>,
    stride: usize,
    k: usize,
    lens: Vec<usize>,
    filled: usize,
}

impl Slab {
    fn new(k: usize) -> Self {
        let stride = MAX_MTU;
        Self {
            buf: AlignedBox::<[u8]>::slice_from_default(REPAIR_ALIGN, k * stride).unwrap(),
            stride,
            k,
            lens: vec![0; k],
            filled: 0,
        }
    }

    fn push(&mut self, payload: &[u8]) {
        debug_assert!(self.filled < self.k);
        debug_assert!(payload.len() <= self.stride);
        let off = self.filled * self.stride;
        self.buf[off..off + payload.len()].copy_from_slice(payload);
        self.lens[self.filled] = payload.len();
        self.filled += 1;
    }

    fn is_full(&self) -> bool {
        self.filled == self.k
    }

    fn symbol_len(&self) -> usize {
        self.lens[..self.filled].iter().copied().max().unwrap_or(0)
    }

    /// Borrows each occupied slot as a slice of `symbol_len` bytes (slots
    /// are zero-initialized, so bytes past a packet's own length are the
    /// required zero padding).
    fn slot_refs(&self, symbol_len: usize) -> Vec<&[u8]> {
        (0..self.filled)
            .map(|i| {
                let off = i * self.stride;
                &self.buf[off..off + symbol_len]
            })
            .collect()
    }
}

/// Groups outgoing packets and emits XOR repair symbols per the configured
/// redundancy ratio. One instance per stream/connection; not safe for
/// concurrent writers.
pub struct FecEncoder {
    config: FecConfig,
    slab: Slab,
    group_index: u64,
    /// Deterministic emission interval derived from the redundancy ratio:
    /// emit a repair every `emit_interval` groups when `redundancy < 0.10`.
    emit_interval: u64,
    metrics: FecEncoderMetrics,
}

impl FecEncoder {
    pub fn new(config: FecConfig) -> Self {
        let emit_interval = if config.redundancy >= 0.10 {
            1
        } else {
            (0.10 / config.redundancy).round().max(1.0) as u64
        };
        Self {
            slab: Slab::new(config.group_size as usize),
            config,
            group_index: 0,
            emit_interval,
            metrics: FecEncoderMetrics::default(),
        }
    }

    fn should_emit(&self) -> bool {
        self.group_index % self.emit_interval == 0
    }

    /// Appends `payload` to the current group. When the group fills, this
    /// may return a wire-ready repair packet.
    pub fn add_packet(&mut self, payload: &[u8], _packet_id: u64) -> Option<Vec<u8>> {
        let payload = &payload[..payload.len().min(MAX_MTU)];
        self.slab.push(payload);
        self.metrics.fec_packets_sent.fetch_add(1, Ordering::Relaxed);

        if !self.slab.is_full() {
            return None;
        }

        let symbol_len = self.slab.symbol_len();
        let emit = self.should_emit();
        let repair_bytes = if emit {
            let refs = self.slab.slot_refs(symbol_len);
            let mut symbol = vec![0u8; symbol_len];
            simd::xor_dispatch(&refs, &mut symbol);
            let mut wire = Vec::new();
            repair::encode(self.group_index, self.config.group_size, &symbol, &mut wire);
            self.metrics.fec_repair_sent.fetch_add(1, Ordering::Relaxed);
            Some(wire)
        } else {
            None
        };

        self.metrics.groups_closed.fetch_add(1, Ordering::Relaxed);
        self.group_index += 1;
        self.slab = Slab::new(self.config.group_size as usize);
        repair_bytes
    }

    /// Flushes a partially filled group. Only an error if the group is
    /// empty.
    pub fn flush(&mut self) -> Result<Option<Vec<u8>>, &'static str> {
        if self.slab.filled == 0 {
            return Err("flush called on an empty group");
        }
        let symbol_len = self.slab.symbol_len();
        let refs = self.slab.slot_refs(symbol_len);
        let mut symbol = vec![0u8; symbol_len];
        simd::xor_dispatch(&refs, &mut symbol);
        let mut wire = Vec::new();
        repair::encode(self.group_index, self.config.group_size, &symbol, &mut wire);
        self.metrics.fec_repair_sent.fetch_add(1, Ordering::Relaxed);
        self.metrics.groups_closed.fetch_add(1, Ordering::Relaxed);
        self.group_index += 1;
        self.slab = Slab::new(self.config.group_size as usize);
        Ok(Some(wire))
    }

    pub fn metrics(&self) -> FecEncoderMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(redundancy: f64, k: u8) -> FecConfig {
        FecConfig {
            redundancy,
            group_size: k,
            ..FecConfig::default()
        }
    }

    #[test]
    fn emits_one_repair_per_full_group_at_default_redundancy() {
        let mut enc = FecEncoder::new(cfg(0.10, 4));
        let mut repairs = 0;
        for i in 0..12u64 {
            if enc.add_packet(&[i as u8; 100], i).is_some() {
                repairs += 1;
            }
        }
        assert_eq!(repairs, 3);
    }

    #[test]
    fn low_redundancy_skips_groups_deterministically() {
        // r = 0.02 -> round(0.10/0.02) = 5: one repair every 5 groups.
        let mut enc = FecEncoder::new(cfg(0.02, 2));
        let mut repairs = 0;
        for i in 0..20u64 {
            if enc.add_packet(&[i as u8; 16], i).is_some() {
                repairs += 1;
            }
        }
        // 10 groups total, emitted at group_index 0, 5 -> 2 repairs.
        assert_eq!(repairs, 2);
    }

    #[test]
    fn flush_on_empty_group_is_an_error() {
        let mut enc = FecEncoder::new(cfg(0.10, 4));
        assert!(enc.flush().is_err());
    }

    #[test]
    fn flush_emits_repair_for_partial_group() {
        let mut enc = FecEncoder::new(cfg(0.10, 4));
        assert!(enc.add_packet(&[1u8; 50], 0).is_none());
        let flushed = enc.flush().unwrap();
        assert!(flushed.is_some());
    }

    #[test]
    fn repair_wire_format_matches_spec_header() {
        let mut enc = FecEncoder::new(cfg(1.0, 2));
        enc.add_packet(&[0xAAu8; 10], 0);
        let repair = enc.add_packet(&[0x55u8; 10], 1).unwrap();
        assert_eq!(&repair[0..2], &crate::wire::repair::MARKER);
        let (header, symbol) = crate::wire::repair::decode(&repair).unwrap();
        assert_eq!(header.group_id, 0);
        assert_eq!(header.k, 2);
        assert_eq!(symbol.len(), 10);
        for b in symbol {
            assert_eq!(*b, 0xFF);
        }
    }
}
