//! Client engine: parallel per-connection workers, per-stream send loops,
//! a shared rate pacer, and fault injection.

pub mod pacer;

use crate::ackfreq::AckFrequencyState;
use crate::config::{Cc, Cli, Pattern};
use crate::congestion;
use crate::error::{ConnectionError, TestbenchError};
use crate::fec::{FecConfig, FecEncoder};
use crate::metrics::MetricsStore;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

const MAX_DATAGRAM_SIZE: usize = 1452;
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const REPAIR_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);
const SHUTDOWN_HARD_CAP: Duration = Duration::from_secs(5);

/// Probabilistic loss/latency/duplication: decide probabilistically per
/// packet, record a counter either way.
#[derive(Debug, Clone, Copy)]
pub struct FaultInjector {
    pub loss_prob: f64,
    pub dup_prob: f64,
    pub latency: Duration,
}

impl FaultInjector {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            loss_prob: cli.emulate_loss,
            dup_prob: cli.emulate_dup,
            latency: cli.emulate_latency,
        }
    }

    fn roll(prob: f64) -> bool {
        prob > 0.0 && rand::thread_rng().gen::<f64>() < prob
    }

    pub fn should_drop(&self) -> bool {
        Self::roll(self.loss_prob)
    }

    pub fn should_duplicate(&self) -> bool {
        Self::roll(self.dup_prob)
    }
}

fn map_cc_to_quiche(cc: Cc) -> quiche::CongestionControlAlgorithm {
    match cc {
        Cc::Cubic => quiche::CongestionControlAlgorithm::CUBIC,
        Cc::Bbrv2 | Cc::Bbrv3 => quiche::CongestionControlAlgorithm::BBR2,
    }
}

fn build_quiche_config(cli: &Cli) -> Result<quiche::Config, TestbenchError> {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION)
        .map_err(|e| TestbenchError::Config(format!("quiche config: {e}")))?;
    config
        .set_application_protos(&[b"quic-testbench"])
        .map_err(|e| TestbenchError::Config(format!("alpn: {e}")))?;
    config.set_max_idle_timeout(30_000);
    config.set_max_recv_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_initial_max_data(10_000_000);
    config.set_initial_max_stream_data_bidi_local(1_000_000);
    config.set_initial_max_stream_data_bidi_remote(1_000_000);
    config.set_initial_max_streams_bidi(cli.streams as u64 + 4);
    config.set_initial_max_streams_uni(4);
    config.set_cc_algorithm(map_cc_to_quiche(cli.cc));
    config.verify_peer(!cli.no_tls);
    Ok(config)
}

fn random_conn_id() -> [u8; quiche::MAX_CONN_ID_LEN] {
    let mut id = [0u8; quiche::MAX_CONN_ID_LEN];
    rand::thread_rng().fill(&mut id[..]);
    id
}

/// Binds a UDP socket with larger send/recv buffers than the OS default,
/// so a high `--rate` run doesn't drop datagrams in the kernel before
/// `quiche` ever sees them.
fn bind_tuned_udp_socket(addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(4 * 1024 * 1024)?;
    socket.set_send_buffer_size(4 * 1024 * 1024)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

async fn drain_sends(
    conn: &AsyncMutex<quiche::Connection>,
    socket: &UdpSocket,
    metrics: &MetricsStore,
) -> std::io::Result<()> {
    let mut out = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, _info) = {
            let mut conn = conn.lock().await;
            match conn.send(&mut out) {
                Ok(v) => v,
                Err(quiche::Error::Done) => break,
                Err(e) => {
                    log::warn!("quiche send error: {e}");
                    break;
                }
            }
        };
        socket.send(&out[..len]).await?;
        metrics.add_bytes_sent(len as u64);
    }
    Ok(())
}

async fn recv_task(
    conn: Arc<AsyncMutex<quiche::Connection>>,
    socket: Arc<UdpSocket>,
    metrics: Arc<MetricsStore>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 65535];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = socket.recv(&mut buf) => {
                let len = match result {
                    Ok(len) => len,
                    Err(e) => {
                        log::warn!("udp recv error: {e}");
                        continue;
                    }
                };
                metrics.add_bytes_received(len as u64);
                metrics.inc_packets_received();
                let recv_info = quiche::RecvInfo {
                    from: socket.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap()),
                    to: socket.local_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap()),
                };
                {
                    let mut c = conn.lock().await;
                    if let Err(e) = c.recv(&mut buf[..len], recv_info) {
                        log::warn!("quiche recv error: {e}");
                        continue;
                    }
                }
                let _ = drain_sends(&conn, &socket, &metrics).await;
            }
        }
    }
}

fn build_payload(stream_seq: u64, packet_size: u16, pattern: Pattern) -> Vec<u8> {
    let size = packet_size.max(8) as usize;
    let mut payload = vec![0u8; size];
    payload[0..8].copy_from_slice(&stream_seq.to_le_bytes());
    match pattern {
        Pattern::Zeroes => {}
        Pattern::Increment => {
            for (i, b) in payload[8..].iter_mut().enumerate() {
                *b = (i & 0xff) as u8;
            }
        }
        Pattern::Random => rand::thread_rng().fill(&mut payload[8..]),
    }
    payload
}

async fn stream_send_loop(
    stream_id: u64,
    conn: Arc<AsyncMutex<quiche::Connection>>,
    controller: Arc<AsyncMutex<Box<dyn congestion::Controller>>>,
    metrics: Arc<MetricsStore>,
    rate: Arc<AtomicU64>,
    faults: FaultInjector,
    packet_size: u16,
    pattern: Pattern,
    deadline: Instant,
    cancel: CancellationToken,
    redundancy: f64,
) {
    let mut encoder = FecEncoder::new(FecConfig {
        redundancy,
        ..FecConfig::default()
    });
    let mut seq: u64 = 0;

    loop {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return;
        }

        if faults.latency > Duration::ZERO {
            if tokio::time::timeout(faults.latency, cancel.cancelled())
                .await
                .is_ok()
            {
                return;
            }
        }

        if faults.should_drop() {
            metrics.inc_error("emulated_loss");
            let rtt = {
                let c = conn.lock().await;
                let rtt = c.path_stats().next().map(|p| p.rtt).unwrap_or_default();
                rtt
            };
            let decision = {
                let mut ctl = controller.lock().await;
                let decision = ctl.on_loss(congestion::Sample {
                    bytes_acked: 0,
                    rtt,
                    loss: true,
                    delivered: 0,
                    delivery_rate: 0.0,
                });
                metrics.set_controller_phase(ctl.phase());
                decision
            };
            metrics.set_cwnd_bytes(decision.cwnd_bytes);
            metrics.set_pacing_bps(decision.pacing_bps);
            seq += 1;
            continue;
        }

        let payload = build_payload(seq, packet_size, pattern);
        let repair_bytes = encoder.add_packet(&payload, seq);
        metrics.inc_fec_packets_sent();

        let duplicate = faults.should_duplicate();
        if duplicate {
            metrics.inc_error("emulated_dup");
        }

        let write_start = Instant::now();
        let writes = if duplicate { 2 } else { 1 };
        let mut failed = false;
        for _ in 0..writes {
            let result = tokio::time::timeout(STREAM_WRITE_TIMEOUT, async {
                let mut c = conn.lock().await;
                c.stream_send(stream_id, &payload, false)
            })
            .await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    let classified = ConnectionError::classify_stream_write(e);
                    metrics.inc_error(classified.label());
                    failed = true;
                    break;
                }
                Err(_) => {
                    metrics.inc_error("stream_write_timeout");
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            metrics.inc_packets_sent();
        }

        if let Some(wire) = repair_bytes {
            let _ = tokio::time::timeout(REPAIR_WRITE_TIMEOUT, async {
                let mut c = conn.lock().await;
                c.stream_send(stream_id, &wire, false)
            })
            .await;
            metrics.inc_fec_repair_sent();
        }

        let rtt = {
            let c = conn.lock().await;
            let rtt = c.path_stats().next().map(|p| p.rtt).unwrap_or_default();
            rtt
        };
        let rtt_micros = if rtt > Duration::ZERO {
            rtt.as_micros() as u64
        } else if faults.latency > Duration::ZERO {
            let jitter = faults.latency.as_micros() as f64 * 0.05;
            (faults.latency.as_micros() as f64 + jitter) as u64
        } else {
            10_000
        };
        metrics.record_latency(rtt_micros);
        metrics.record_jitter(write_start.elapsed().as_micros() as u64);

        let acked_rtt = Duration::from_micros(rtt_micros);
        let sample = congestion::Sample {
            bytes_acked: payload.len() as u64,
            rtt: acked_rtt,
            loss: failed,
            delivered: payload.len() as u64,
            delivery_rate: payload.len() as f64 / acked_rtt.as_secs_f64().max(1e-6),
        };
        let decision = {
            let mut ctl = controller.lock().await;
            let decision = if failed {
                ctl.on_loss(sample)
            } else {
                ctl.on_ack(sample)
            };
            metrics.set_controller_phase(ctl.phase());
            decision
        };
        metrics.set_cwnd_bytes(decision.cwnd_bytes);
        metrics.set_pacing_bps(decision.pacing_bps);

        seq += 1;

        let r = rate.load(Ordering::Relaxed).max(1);
        let rate_interval = Duration::from_secs_f64(1.0 / r as f64);
        let pacing_interval = if decision.pacing_bps > 0.0 {
            Duration::from_secs_f64((payload.len() as f64 * 8.0) / decision.pacing_bps)
        } else {
            Duration::ZERO
        };
        let sleep_for = rate_interval.max(pacing_interval);
        if tokio::time::timeout(sleep_for, cancel.cancelled())
            .await
            .is_ok()
        {
            return;
        }
    }
}

async fn run_connection(
    cli: Arc<Cli>,
    server_addr: SocketAddr,
    metrics: Arc<MetricsStore>,
    cancel: CancellationToken,
    deadline: Instant,
) {
    let unspecified: SocketAddr = if server_addr.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    let socket = match bind_tuned_udp_socket(unspecified).and_then(UdpSocket::from_std) {
        Ok(s) => s,
        Err(e) => {
            metrics.inc_error("udp_socket");
            log::error!("udp bind failed: {e}");
            return;
        }
    };
    if let Err(e) = socket.connect(server_addr).await {
        metrics.inc_error("udp_socket");
        log::error!("udp connect failed: {e}");
        return;
    }
    let socket = Arc::new(socket);

    let mut config = match build_quiche_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            metrics.inc_error("quic_handshake");
            log::error!("config error: {e}");
            return;
        }
    };

    let scid = quiche::ConnectionId::from_vec(random_conn_id().to_vec());
    let local_addr = socket.local_addr().unwrap_or(server_addr);
    let conn = match quiche::connect(None, &scid, local_addr, server_addr, &mut config) {
        Ok(c) => c,
        Err(e) => {
            metrics.inc_error("quic_handshake");
            log::error!("quiche connect failed: {e}");
            return;
        }
    };

    let handshake_start = Instant::now();
    let conn = Arc::new(AsyncMutex::new(conn));

    if let Err(e) = drain_sends(&conn, &socket, &metrics).await {
        metrics.inc_error("udp_socket");
        log::error!("initial send failed: {e}");
        return;
    }

    let recv_handle = tokio::spawn(recv_task(
        conn.clone(),
        socket.clone(),
        metrics.clone(),
        cancel.clone(),
    ));

    loop {
        if cancel.is_cancelled() {
            recv_handle.abort();
            return;
        }
        let established = conn.lock().await.is_established();
        if established {
            break;
        }
        if handshake_start.elapsed() > Duration::from_secs(10) {
            metrics.inc_error("quic_handshake");
            recv_handle.abort();
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    metrics.inc_handshake();
    metrics.record_handshake(handshake_start.elapsed().as_micros() as u64);
    metrics.inc_one_rtt();

    let mut ack_state = AckFrequencyState::new(Duration::from_millis(cli.ackmad));
    if cli.tp_min_ack_us > 0 {
        ack_state.set_peer_min_ack_delay(Duration::from_micros(cli.tp_min_ack_us));
    }
    let mut controller: Box<dyn congestion::Controller> = congestion::make_controller(cli.cc.name())
        .unwrap_or_else(|| Box::new(congestion::cubic::CubicController::new()));
    controller.init(32 * cli.packet_size as u64, cli.packet_size as u64);
    let controller = Arc::new(AsyncMutex::new(controller));

    let rate = Arc::new(AtomicU64::new(1));
    let ramp_cancel = cancel.clone();
    let ramp_handle = pacer::spawn(
        rate.clone(),
        cli.rate as u64,
        deadline.saturating_duration_since(Instant::now()),
        ramp_cancel,
    );

    let faults = FaultInjector::from_cli(&cli);
    let mut stream_handles = Vec::new();
    for i in 0..cli.streams {
        let stream_id = 4 * i as u64;
        stream_handles.push(tokio::spawn(stream_send_loop(
            stream_id,
            conn.clone(),
            controller.clone(),
            metrics.clone(),
            rate.clone(),
            faults,
            cli.packet_size,
            cli.pattern,
            deadline,
            cancel.clone(),
            cli.fec,
        )));
    }

    for handle in stream_handles {
        let _ = handle.await;
    }
    let _ = ramp_handle.await;

    tokio::select! {
        _ = tokio::time::sleep(SHUTDOWN_DRAIN) => {}
        _ = cancel.cancelled() => {}
    }
    {
        let mut c = conn.lock().await;
        let _ = c.close(true, 0x00, b"done");
    }
    let _ = drain_sends(&conn, &socket, &metrics).await;
    tokio::time::sleep(SHUTDOWN_HARD_CAP.min(Duration::from_millis(200))).await;
    recv_handle.abort();
    let _ = ack_state.poll();
}

/// Runs `cli.connections` parallel connection workers for `cli.duration`,
/// each with its own stream workers, recording into `metrics`.
pub async fn run(cli: Arc<Cli>, metrics: Arc<MetricsStore>, cancel: CancellationToken) {
    let server_addr: SocketAddr = match cli.addr.parse() {
        Ok(a) => a,
        Err(e) => {
            log::error!("invalid server address {}: {e}", cli.addr);
            return;
        }
    };
    let deadline = Instant::now() + cli.duration;

    let mut handles = Vec::new();
    for _ in 0..cli.connections {
        handles.push(tokio::spawn(run_connection(
            cli.clone(),
            server_addr,
            metrics.clone(),
            cancel.clone(),
            deadline,
        )));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_injector_never_drops_at_zero_probability() {
        let faults = FaultInjector {
            loss_prob: 0.0,
            dup_prob: 0.0,
            latency: Duration::ZERO,
        };
        for _ in 0..1000 {
            assert!(!faults.should_drop());
            assert!(!faults.should_duplicate());
        }
    }

    #[test]
    fn payload_embeds_monotonic_sequence_number() {
        let p = build_payload(42, 64, Pattern::Zeroes);
        assert_eq!(&p[0..8], &42u64.to_le_bytes());
        assert_eq!(p.len(), 64);
    }

    #[test]
    fn quiche_cc_mapping_matches_cli_choice() {
        assert_eq!(
            map_cc_to_quiche(Cc::Cubic),
            quiche::CongestionControlAlgorithm::CUBIC
        );
        assert_eq!(
            map_cc_to_quiche(Cc::Bbrv2),
            quiche::CongestionControlAlgorithm::BBR2
        );
    }
}
