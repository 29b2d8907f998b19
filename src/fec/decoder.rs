//! FEC decoder: tracks in-flight groups and recovers a single missing
//! symbol per group by XORing the data and repair symbols it has received.

use super::FecConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct FecDecoderMetrics {
    pub packets_recovered: AtomicU64,
    pub groups_unrecoverable: AtomicU64,
    pub groups_expired: AtomicU64,
    pub groups_evicted: AtomicU64,
}

impl FecDecoderMetrics {
    fn snapshot(&self) -> FecDecoderMetricsSnapshot {
        FecDecoderMetricsSnapshot {
            packets_recovered: self.packets_recovered.load(Ordering::Relaxed),
            groups_unrecoverable: self.groups_unrecoverable.load(Ordering::Relaxed),
            groups_expired: self.groups_expired.load(Ordering::Relaxed),
            groups_evicted: self.groups_evicted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FecDecoderMetricsSnapshot {
    pub packets_recovered: u64,
    pub groups_unrecoverable: u64,
    pub groups_expired: u64,
    pub groups_evicted: u64,
}

/// A recovered symbol, handed back to the caller so it can be fed into the
/// stream as though it had arrived on the wire.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub group_id: u64,
    pub slot: u8,
    pub payload: Vec<u8>,
}

struct GroupState {
    k: u8,
    /// Fixed from the first data or repair symbol this group sees, clamped
    /// to `MAX_MTU`. Every later symbol is padded or truncated to match
    /// before it is stored, so every slot the SIMD kernel sees is the same
    /// length.
    symbol_len: Option<usize>,
    slots: Vec<Option<Vec<u8>>>,
    repair: Option<Vec<u8>>,
    received: usize,
    last_seen: Instant,
    resolved: bool,
}

impl GroupState {
    fn new(k: u8) -> Self {
        Self {
            k,
            symbol_len: None,
            slots: vec![None; k as usize],
            repair: None,
            received: 0,
            last_seen: Instant::now(),
            resolved: false,
        }
    }

    /// Fixes the group's symbol length on first use and pads/truncates
    /// `payload` to it.
    fn normalize(&mut self, payload: &[u8]) -> Vec<u8> {
        let len = *self
            .symbol_len
            .get_or_insert(payload.len().min(super::MAX_MTU));
        let mut out = vec![0u8; len];
        let copy_len = payload.len().min(len);
        out[..copy_len].copy_from_slice(&payload[..copy_len]);
        out
    }

    fn missing_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| if s.is_none() { Some(i) } else { None })
            .collect()
    }

    /// Recovers the one missing data slot by XORing every other data slot
    /// together with the repair symbol. Only valid when exactly one slot is
    /// missing and a repair symbol has been received.
    fn try_recover(&self) -> Option<Vec<u8>> {
        let missing = self.missing_slots();
        if missing.len() != 1 {
            return None;
        }
        let repair = self.repair.as_ref()?;
        let symbol_len = self.symbol_len?;
        let present: Vec<&[u8]> = self
            .slots
            .iter()
            .filter_map(|s| s.as_deref())
            .collect();
        let mut out = vec![0u8; symbol_len];
        let mut refs: Vec<&[u8]> = present;
        refs.push(repair.as_slice());
        super::simd::xor_dispatch(&refs, &mut out);
        Some(out)
    }
}

/// Accepts data and repair symbols for FEC groups, recovering the one
/// missing data symbol per group when possible. Shared across the tasks
/// feeding it via an internal mutex.
pub struct FecDecoder {
    config: FecConfig,
    groups: Mutex<HashMap<u64, GroupState>>,
    metrics: FecDecoderMetrics,
}

impl FecDecoder {
    pub fn new(config: FecConfig) -> Self {
        Self {
            config,
            groups: Mutex::new(HashMap::new()),
            metrics: FecDecoderMetrics::default(),
        }
    }

    fn evict_if_full(&self, groups: &mut HashMap<u64, GroupState>) {
        if groups.len() < self.config.max_active_groups {
            return;
        }
        if let Some(&oldest) = groups
            .iter()
            .min_by_key(|(_, g)| g.last_seen)
            .map(|(id, _)| id)
        {
            groups.remove(&oldest);
            self.metrics.groups_evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops `group_id` outright on a `k` mismatch against its
    /// previously-established size: the group can no longer be recovered
    /// against a consistent slot layout. Returns `false` if the group was
    /// dropped (or never existed with a different `k`), `true` if `k`
    /// agrees with the existing group or no group exists yet.
    fn check_k_or_drop(&self, groups: &mut HashMap<u64, GroupState>, group_id: u64, k: u8) -> bool {
        match groups.get(&group_id) {
            Some(group) if group.k != k => {
                groups.remove(&group_id);
                self.metrics
                    .groups_unrecoverable
                    .fetch_add(1, Ordering::Relaxed);
                false
            }
            _ => true,
        }
    }

    /// Registers a data packet occupying `slot` of group `group_id`.
    pub fn add_data_packet(
        &self,
        group_id: u64,
        slot: u8,
        k: u8,
        payload: &[u8],
    ) -> Option<Recovered> {
        let mut groups = self.groups.lock().unwrap();
        if !self.check_k_or_drop(&mut groups, group_id, k) {
            return None;
        }
        if !groups.contains_key(&group_id) {
            self.evict_if_full(&mut groups);
            groups.insert(group_id, GroupState::new(k));
        }
        let group = groups.get_mut(&group_id).unwrap();
        if group.resolved || slot as usize >= group.slots.len() {
            return None;
        }
        if group.slots[slot as usize].is_none() {
            let normalized = group.normalize(payload);
            group.slots[slot as usize] = Some(normalized);
            group.received += 1;
        }
        group.last_seen = Instant::now();
        self.maybe_recover(group_id, &mut groups)
    }

    /// Registers the repair symbol for `group_id`.
    pub fn add_repair_packet(&self, group_id: u64, k: u8, symbol: &[u8]) -> Option<Recovered> {
        let mut groups = self.groups.lock().unwrap();
        if !self.check_k_or_drop(&mut groups, group_id, k) {
            return None;
        }
        if !groups.contains_key(&group_id) {
            self.evict_if_full(&mut groups);
            groups.insert(group_id, GroupState::new(k));
        }
        let group = groups.get_mut(&group_id).unwrap();
        if group.resolved {
            return None;
        }
        let normalized = group.normalize(symbol);
        group.repair = Some(normalized);
        group.last_seen = Instant::now();
        self.maybe_recover(group_id, &mut groups)
    }

    fn maybe_recover(
        &self,
        group_id: u64,
        groups: &mut HashMap<u64, GroupState>,
    ) -> Option<Recovered> {
        let group = groups.get_mut(&group_id)?;
        let missing = group.missing_slots();
        if missing.is_empty() {
            group.resolved = true;
            return None;
        }
        if missing.len() == 1 {
            if let Some(payload) = group.try_recover() {
                let slot = missing[0] as u8;
                group.slots[slot as usize] = Some(payload.clone());
                group.resolved = true;
                self.metrics
                    .packets_recovered
                    .fetch_add(1, Ordering::Relaxed);
                return Some(Recovered {
                    group_id,
                    slot,
                    payload,
                });
            }
        } else if group.repair.is_some() {
            // Repair arrived but more than one symbol is still missing:
            // this group can never be fully recovered by this scheme.
            group.resolved = true;
            self.metrics
                .groups_unrecoverable
                .fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Drops groups that have been open longer than `group_ttl` without
    /// resolving, counting each as a loss.
    pub fn cleanup_expired(&self) {
        let mut groups = self.groups.lock().unwrap();
        let ttl = self.config.group_ttl;
        let now = Instant::now();
        let expired: Vec<u64> = groups
            .iter()
            .filter(|(_, g)| !g.resolved && now.duration_since(g.last_seen) > ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            groups.remove(&id);
            self.metrics.groups_expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> FecDecoderMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg() -> FecConfig {
        FecConfig {
            redundancy: 0.10,
            group_size: 4,
            max_active_groups: 16,
            group_ttl: Duration::from_millis(50),
        }
    }

    fn xor_all(parts: &[&[u8]], len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        super::super::simd::xor_dispatch(parts, &mut out);
        out
    }

    #[test]
    fn recovers_the_single_missing_slot() {
        let dec = FecDecoder::new(cfg());
        let a = vec![1u8; 32];
        let b = vec![2u8; 32];
        let c = vec![3u8; 32];
        let d = vec![4u8; 32];
        let repair = xor_all(&[&a, &b, &c, &d], 32);

        assert!(dec.add_data_packet(0, 0, 4, &a).is_none());
        assert!(dec.add_data_packet(0, 1, 4, &b).is_none());
        assert!(dec.add_data_packet(0, 2, 4, &c).is_none());
        let recovered = dec.add_repair_packet(0, 4, &repair).unwrap();
        assert_eq!(recovered.slot, 3);
        assert_eq!(recovered.payload, d);
        assert_eq!(dec.metrics().packets_recovered, 1);
    }

    #[test]
    fn two_missing_slots_is_unrecoverable() {
        let dec = FecDecoder::new(cfg());
        let a = vec![1u8; 16];
        let b = vec![2u8; 16];
        let c = vec![3u8; 16];
        let d = vec![4u8; 16];
        let repair = xor_all(&[&a, &b, &c, &d], 16);

        assert!(dec.add_data_packet(1, 0, 4, &a).is_none());
        assert!(dec.add_data_packet(1, 1, 4, &b).is_none());
        assert!(dec.add_repair_packet(1, 4, &repair).is_none());
        assert_eq!(dec.metrics().groups_unrecoverable, 1);
    }

    #[test]
    fn fully_received_group_needs_no_recovery() {
        let dec = FecDecoder::new(cfg());
        for i in 0..4u8 {
            assert!(dec.add_data_packet(2, i, 4, &[i; 8]).is_none());
        }
        assert_eq!(dec.metrics().packets_recovered, 0);
        assert_eq!(dec.metrics().groups_unrecoverable, 0);
    }

    #[test]
    fn expired_groups_are_evicted_and_counted() {
        let dec = FecDecoder::new(cfg());
        dec.add_data_packet(3, 0, 4, &[0u8; 8]);
        std::thread::sleep(Duration::from_millis(80));
        dec.cleanup_expired();
        assert_eq!(dec.metrics().groups_expired, 1);
    }

    #[test]
    fn k_mismatch_drops_the_group_and_counts_it() {
        let dec = FecDecoder::new(cfg());
        assert!(dec.add_data_packet(5, 0, 4, &[1u8; 16]).is_none());
        // A repair symbol claiming a different k for the same group can
        // never be combined with the slots already collected under the
        // old layout; the group is dropped rather than silently merged.
        assert!(dec.add_repair_packet(5, 6, &[2u8; 16]).is_none());
        assert_eq!(dec.metrics().groups_unrecoverable, 1);
        // The group_id is free again under the new k.
        assert!(dec.add_data_packet(5, 0, 6, &[3u8; 16]).is_none());
    }

    #[test]
    fn heterogeneous_lengths_are_normalized_before_recovery() {
        let dec = FecDecoder::new(cfg());
        let a = vec![1u8; 10];
        let b = vec![2u8; 32];
        let c = vec![3u8; 20];
        // The group's symbol_len is fixed from `a`, the first symbol seen;
        // `b` and `c` get truncated to it before the repair XOR runs.
        let symbol_len = a.len();
        let repair = xor_all(&[&a, &b[..symbol_len], &c[..symbol_len]], symbol_len);

        assert!(dec.add_data_packet(9, 0, 4, &a).is_none());
        assert!(dec.add_data_packet(9, 1, 4, &b).is_none());
        assert!(dec.add_data_packet(9, 2, 4, &c).is_none());
        let recovered = dec.add_repair_packet(9, 4, &repair).unwrap();
        assert_eq!(recovered.payload.len(), symbol_len);
    }

    #[test]
    fn eviction_makes_room_when_at_capacity() {
        let mut small = cfg();
        small.max_active_groups = 2;
        let dec = FecDecoder::new(small);
        dec.add_data_packet(0, 0, 4, &[0u8; 8]);
        std::thread::sleep(Duration::from_millis(2));
        dec.add_data_packet(1, 0, 4, &[0u8; 8]);
        std::thread::sleep(Duration::from_millis(2));
        dec.add_data_packet(2, 0, 4, &[0u8; 8]);
        assert_eq!(dec.metrics().groups_evicted, 1);
    }
}
