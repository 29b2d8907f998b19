//! Forward error correction: a single-loss systematic XOR scheme over
//! fixed-size packet groups. One repair symbol per group of `k` packets,
//! able to recover exactly one missing symbol per group.

pub mod decoder;
pub mod encoder;
pub mod simd;

pub use decoder::{FecDecoder, FecDecoderMetrics};
pub use encoder::{FecEncoder, FecEncoderMetrics};

/// Maximum payload size a packet (or symbol) may carry.
pub const MAX_MTU: usize = 1500;

/// Shared encoder/decoder configuration.
#[derive(Debug, Clone, Copy)]
pub struct FecConfig {
    /// Redundancy ratio r in (0, 1]. Default 0.10.
    pub redundancy: f64,
    /// Packets per group (k). Default 10.
    pub group_size: u8,
    /// Maximum groups the decoder keeps active at once. Default 4096.
    pub max_active_groups: usize,
    /// Group lifetime before eviction. Default 5s.
    pub group_ttl: std::time::Duration,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            redundancy: 0.10,
            group_size: 10,
            max_active_groups: 4096,
            group_ttl: std::time::Duration::from_secs(5),
        }
    }
}

impl FecConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.redundancy > 0.0 && self.redundancy <= 1.0) {
            return Err(format!(
                "fec redundancy must be in (0, 1], got {}",
                self.redundancy
            ));
        }
        if self.group_size == 0 {
            return Err("fec group_size must be >= 1".to_string());
        }
        if self.max_active_groups == 0 {
            return Err("fec max_active_groups must be >= 1".to_string());
        }
        Ok(())
    }
}
