//! CLI flags plus an optional unified TOML config file layered on top,
//! loaded and validated the same way.

use crate::error::TestbenchError;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
    Test,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Random,
    Zeroes,
    Increment,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cc {
    Cubic,
    Bbrv2,
    Bbrv3,
}

impl Cc {
    pub fn name(&self) -> &'static str {
        match self {
            Cc::Cubic => "cubic",
            Cc::Bbrv2 => "bbrv2",
            Cc::Bbrv3 => "bbrv3",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormatArg {
    Md,
    Csv,
    Json,
}

/// Core CLI surface for the testbench: run mode, connection shaping, fault
/// injection, congestion control, FEC, and reporting.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "QUIC performance and conformance testbench")]
pub struct Cli {
    #[arg(long, value_enum)]
    pub mode: Mode,

    #[arg(long)]
    pub addr: String,

    #[arg(long, default_value_t = 1)]
    pub connections: u32,

    #[arg(long, default_value_t = 1)]
    pub streams: u32,

    #[arg(long, value_parser = humantime_duration, default_value = "10s")]
    pub duration: Duration,

    #[arg(long, default_value_t = 1200)]
    pub packet_size: u16,

    #[arg(long, default_value_t = 100)]
    pub rate: u32,

    #[arg(long, value_enum, default_value_t = Pattern::Random)]
    pub pattern: Pattern,

    #[arg(long)]
    pub no_tls: bool,

    #[arg(long)]
    pub cert: Option<PathBuf>,

    #[arg(long)]
    pub key: Option<PathBuf>,

    #[arg(long)]
    pub prometheus: bool,

    #[arg(long)]
    pub report: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ReportFormatArg::Json)]
    pub report_format: ReportFormatArg,

    #[arg(long, default_value_t = 0.0)]
    pub emulate_loss: f64,

    #[arg(long, value_parser = humantime_duration, default_value = "0s")]
    pub emulate_latency: Duration,

    #[arg(long, default_value_t = 0.0)]
    pub emulate_dup: f64,

    #[arg(long, value_enum, default_value_t = Cc::Cubic)]
    pub cc: Cc,

    #[arg(long, default_value_t = 2)]
    pub ackfreq: u64,

    #[arg(long, default_value_t = 25)]
    pub ackmad: u64,

    #[arg(long, default_value_t = 1)]
    pub ackrth: u64,

    #[arg(long, default_value_t = 0)]
    pub tp_min_ack_us: u64,

    #[arg(long, default_value_t = 0.10)]
    pub fec: f64,

    #[arg(long)]
    pub sla_rtt_p95: Option<f64>,

    #[arg(long)]
    pub sla_loss: Option<f64>,

    #[arg(long)]
    pub sla_throughput: Option<f64>,

    #[arg(long)]
    pub sla_errors: Option<u64>,

    /// Unified TOML config overriding individual flags.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub observer_url: Option<String>,
}

fn humantime_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    pub fn validate(&self) -> Result<(), TestbenchError> {
        if self.connections == 0 {
            return Err(TestbenchError::Config("connections must be >= 1".into()));
        }
        if self.streams == 0 {
            return Err(TestbenchError::Config("streams must be >= 1".into()));
        }
        if self.packet_size == 0 || self.packet_size as usize > crate::fec::MAX_MTU {
            return Err(TestbenchError::Config(format!(
                "packet_size must be in 1..={}",
                crate::fec::MAX_MTU
            )));
        }
        if !(0.0..=1.0).contains(&self.emulate_loss) {
            return Err(TestbenchError::Config("emulate_loss must be in [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.emulate_dup) {
            return Err(TestbenchError::Config("emulate_dup must be in [0,1]".into()));
        }
        if !(self.fec > 0.0 && self.fec <= 1.0) {
            return Err(TestbenchError::Config("fec redundancy must be in (0,1]".into()));
        }
        if !self.no_tls && self.mode == Mode::Server && (self.cert.is_none() || self.key.is_none())
        {
            return Err(TestbenchError::Config(
                "server mode without --no-tls requires --cert and --key".into(),
            ));
        }
        self.addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| TestbenchError::Config(format!("invalid --addr {}", self.addr)))?;
        Ok(())
    }

    pub fn sla_thresholds(&self) -> crate::sla::SlaThresholds {
        crate::sla::SlaThresholds {
            rtt_p95_ms: self.sla_rtt_p95,
            loss_pct: self.sla_loss,
            throughput_kbps_min: self.sla_throughput,
            errors_max: self.sla_errors,
        }
    }
}

/// Optional on-disk override (`FecSettings`/`CongestionSettings`/
/// `AckFrequencySettings`), loaded with `serde` + `toml` and merged over
/// CLI defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub fec: Option<FecSettings>,
    pub congestion: Option<CongestionSettings>,
    pub ack_frequency: Option<AckFrequencySettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FecSettings {
    pub redundancy: Option<f64>,
    pub group_size: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CongestionSettings {
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckFrequencySettings {
    pub threshold: Option<u64>,
    pub max_ack_delay_ms: Option<u64>,
    pub reordering_threshold: Option<u64>,
}

impl FileConfig {
    pub fn from_str(s: &str) -> Result<Self, TestbenchError> {
        toml::from_str(s).map_err(|e| TestbenchError::Config(e.to_string()))
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, TestbenchError> {
        let text = std::fs::read_to_string(path).map_err(TestbenchError::Io)?;
        Self::from_str(&text)
    }

    pub fn validate(&self) -> Result<(), TestbenchError> {
        if let Some(fec) = &self.fec {
            if let Some(r) = fec.redundancy {
                if !(r > 0.0 && r <= 1.0) {
                    return Err(TestbenchError::Config("fec.redundancy must be in (0,1]".into()));
                }
            }
        }
        Ok(())
    }
}
