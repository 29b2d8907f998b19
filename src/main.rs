use clap::Parser;
use quic_testbench::config::{Cli, FileConfig, Mode, ReportFormatArg};
use quic_testbench::metrics::exporter::{self, ReportFormat};
use quic_testbench::metrics::{bridge, global, sampler};
use quic_testbench::{client, server, sla};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const SERIES_CAPACITY_SECS: usize = 3600;

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }
    if let Some(path) = &cli.config {
        match FileConfig::from_file(path) {
            Ok(file_cfg) => {
                if let Err(e) = file_cfg.validate() {
                    eprintln!("invalid config file: {e}");
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("failed to load config file {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    let cli = Arc::new(cli);
    let metrics = global(SERIES_CAPACITY_SECS);
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let mut background = Vec::new();

    {
        let store = metrics.clone();
        let sampler_cancel = cancel.clone();
        background.push(tokio::spawn(async move {
            sampler::run(store, start, sampler_cancel).await;
        }));
    }

    if cli.prometheus {
        let prom_addr = format!("0.0.0.0:{}", prometheus_port(&cli.addr));
        background.push(tokio::spawn(async move {
            if let Err(e) = exporter::serve_prometheus(&prom_addr).await {
                log::error!("prometheus endpoint failed: {e}");
            }
        }));
    }

    if let Some(observer_url) = cli.observer_url.clone() {
        let store = metrics.clone();
        let bridge_cancel = cancel.clone();
        let connections = cli.connections;
        let streams = cli.streams;
        background.push(tokio::spawn(async move {
            bridge::run(store, observer_url, connections, streams, start, bridge_cancel).await;
        }));
    }

    let shutdown_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    match cli.mode {
        Mode::Client => {
            client::run(cli.clone(), metrics.clone(), cancel.clone()).await;
            cancel.cancel();
        }
        Mode::Server | Mode::Test => {
            tokio::select! {
                _ = server::run(cli.clone(), metrics.clone(), cancel.clone()) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    ctrl_c.abort();
    for handle in background {
        handle.abort();
    }

    let snapshot = metrics.snapshot();

    if let Some(report_path) = &cli.report {
        let format = match cli.report_format {
            ReportFormatArg::Json => ReportFormat::Json,
            ReportFormatArg::Md => ReportFormat::Markdown,
            ReportFormatArg::Csv => ReportFormat::Csv,
        };
        if let Err(e) = exporter::write_report(&snapshot, report_path, format, cli.prometheus) {
            eprintln!("failed to write report: {e}");
            std::process::exit(1);
        }
    }

    let thresholds = cli.sla_thresholds();
    if thresholds.is_configured() {
        let violations = sla::evaluate(&thresholds, &snapshot);
        sla::print_violations(&violations);
        std::process::exit(sla::exit_code(&violations));
    }

    std::process::exit(0);
}

/// Picks a distinct local port for the Prometheus scrape endpoint, derived
/// from the data-plane port so running several testbench instances on one
/// host doesn't collide by default.
fn prometheus_port(addr: &str) -> u16 {
    addr.rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .map(|p| p.wrapping_add(1000).max(1025))
        .unwrap_or(9898)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_port_is_offset_from_data_port() {
        assert_eq!(prometheus_port("127.0.0.1:9000"), 10000);
    }

    #[test]
    fn prometheus_port_falls_back_when_unparsable() {
        assert_eq!(prometheus_port("not-an-addr"), 9898);
    }
}
