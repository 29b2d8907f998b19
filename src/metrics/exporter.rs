//! Prometheus scrape endpoint and file report writer.

use super::MetricsSnapshot;
use crate::error::TestbenchError;
use prometheus::{Encoder, TextEncoder};
use std::fs;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Markdown,
    Csv,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Self::Json),
            "md" | "markdown" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Encodes the default registry into Prometheus text exposition format.
pub fn encode_prometheus_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).expect("prometheus encode");
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serves `GET /metrics` on `addr` until the process exits, on a plain
/// `tokio::net::TcpListener` accept loop.
pub async fn serve_prometheus(addr: &str) -> Result<(), TestbenchError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TestbenchError::Io(source))?;
    loop {
        let (mut socket, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("metrics listener accept failed: {e}");
                continue;
            }
        };
        tokio::spawn(async move {
            let mut discard = [0u8; 1024];
            let _ = socket.read(&mut discard).await;
            let body = encode_prometheus_text();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

/// Writes the selected report format to `path`, and a sibling `.prom`
/// file when `with_prom_sidecar` is set.
pub fn write_report(
    snapshot: &MetricsSnapshot,
    path: &Path,
    format: ReportFormat,
    with_prom_sidecar: bool,
) -> Result<(), TestbenchError> {
    let body = match format {
        ReportFormat::Json => render_json(snapshot),
        ReportFormat::Markdown => render_markdown(snapshot),
        ReportFormat::Csv => render_csv(snapshot),
    };
    fs::write(path, body).map_err(|source| TestbenchError::Io(source))?;

    if with_prom_sidecar {
        let prom_path = path.with_extension("prom");
        fs::write(prom_path, encode_prometheus_text())
            .map_err(|source| TestbenchError::Io(source))?;
    }
    Ok(())
}

fn render_json(snapshot: &MetricsSnapshot) -> String {
    serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
}

fn render_csv(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::from(
        "t_secs,avg_latency_ms,throughput_kbps,loss_pct,retransmits,controller_phase,cwnd_bytes,pacing_bps,bandwidth_bps,min_rtt_ms\n",
    );
    for s in &snapshot.series {
        out.push_str(&format!(
            "{},{:.3},{:.3},{:.3},{},{},{},{:.1},{:.1},{:.3}\n",
            s.t_secs,
            s.avg_latency_ms,
            s.throughput_kbps,
            s.loss_pct,
            s.retransmits,
            s.controller_phase,
            s.cwnd_bytes,
            s.pacing_bps,
            s.bandwidth_bps,
            s.min_rtt_ms
        ));
    }
    out
}

fn render_markdown(snapshot: &MetricsSnapshot) -> String {
    let c = &snapshot.counters;
    let mut out = String::new();
    out.push_str("# QUIC testbench report\n\n");
    out.push_str("## Counters\n\n");
    out.push_str(&format!("- packets sent: {}\n", c.packets_sent));
    out.push_str(&format!("- packets received: {}\n", c.packets_received));
    out.push_str(&format!("- bytes sent: {}\n", c.bytes_sent));
    out.push_str(&format!("- bytes received: {}\n", c.bytes_received));
    out.push_str(&format!("- retransmits: {}\n", c.retransmits));
    out.push_str(&format!("- handshakes: {}\n", c.handshakes));
    out.push_str(&format!("- errors: {}\n", c.errors_total));
    out.push_str(&format!(
        "- fec: sent={} repair={} recovered={} failed={}\n",
        c.fec_packets_sent, c.fec_repair_sent, c.fec_recovered, c.fec_recovery_failed
    ));
    out.push_str("\n## Latency (ms)\n\n");
    out.push_str(&format!(
        "- p50={:.3} p95={:.3} p99={:.3} mean={:.3} count={}\n",
        snapshot.latency.p50 as f64 / 1000.0,
        snapshot.latency.p95 as f64 / 1000.0,
        snapshot.latency.p99 as f64 / 1000.0,
        snapshot.latency.mean / 1000.0,
        snapshot.latency.count
    ));
    out.push_str("\n## Throughput over time (sparkline)\n\n```\n");
    out.push_str(&sparkline(
        snapshot.series.iter().map(|s| s.throughput_kbps).collect(),
    ));
    out.push_str("\n```\n");
    out
}

/// ASCII sparkline rendered straight from the sample ring, no charting
/// dependency needed.
fn sparkline(values: Vec<f64>) -> String {
    const LEVELS: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '@'];
    if values.is_empty() {
        return String::new();
    }
    let max = values.iter().cloned().fold(0.0_f64, f64::max).max(1.0);
    values
        .iter()
        .map(|v| {
            let idx = ((v / max) * (LEVELS.len() - 1) as f64).round() as usize;
            LEVELS[idx.min(LEVELS.len() - 1)]
        })
        .collect()
}

pub fn report_path_extension(format: ReportFormat) -> &'static str {
    match format {
        ReportFormat::Json => "json",
        ReportFormat::Markdown => "md",
        ReportFormat::Csv => "csv",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::series::DerivedSample;

    fn snapshot_with_series() -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::default();
        snap.series.push(DerivedSample {
            t_secs: 0,
            throughput_kbps: 10.0,
            controller_phase: "startup",
            ..Default::default()
        });
        snap.series.push(DerivedSample {
            t_secs: 1,
            throughput_kbps: 20.0,
            controller_phase: "probe_bw",
            ..Default::default()
        });
        snap
    }

    #[test]
    fn json_report_round_trips_through_serde() {
        let snap = snapshot_with_series();
        let text = render_json(&snap);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(parsed["series"].is_array());
    }

    #[test]
    fn csv_report_has_one_row_per_sample_plus_header() {
        let snap = snapshot_with_series();
        let csv = render_csv(&snap);
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn markdown_report_contains_sparkline_block() {
        let snap = snapshot_with_series();
        let md = render_markdown(&snap);
        assert!(md.contains("```"));
    }

    #[test]
    fn report_format_parses_known_strings() {
        assert_eq!(ReportFormat::parse("json"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::parse("csv"), Some(ReportFormat::Csv));
        assert_eq!(ReportFormat::parse("bogus"), None);
    }
}
