//! Server engine: accepts connections, drains stream data into a discard
//! buffer, and exposes the same metrics surface as the client. No
//! application semantics beyond drain.

use crate::config::Cli;
use crate::fec::{FecConfig, FecDecoder};
use crate::metrics::MetricsStore;
use crate::wire::repair;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const MAX_DATAGRAM_SIZE: usize = 1452;
const READ_BUF_LEN: usize = 65535;

struct ClientConn {
    conn: quiche::Connection,
    last_seen: Instant,
    fec: FecDecoder,
    fec_unrecoverable_seen: u64,
}

impl ClientConn {
    fn new(conn: quiche::Connection) -> Self {
        Self {
            conn,
            last_seen: Instant::now(),
            fec: FecDecoder::new(FecConfig::default()),
            fec_unrecoverable_seen: 0,
        }
    }
}

/// Binds the listening UDP socket with larger send/recv buffers than the
/// OS default, so a fleet of clients hammering `--rate` doesn't lose
/// datagrams in the kernel before `quiche` sees them.
fn bind_tuned_udp_socket(addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(8 * 1024 * 1024)?;
    socket.set_send_buffer_size(8 * 1024 * 1024)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

fn build_quiche_config(cli: &Cli) -> Result<quiche::Config, crate::error::TestbenchError> {
    use crate::error::TestbenchError;
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

    if !cli.no_tls {
        let cert = cli.cert.as_ref().ok_or_else(|| {
            TestbenchError::Config("server mode requires --cert without --no-tls".into())
        })?;
        let key = cli.key.as_ref().ok_or_else(|| {
            TestbenchError::Config("server mode requires --key without --no-tls".into())
        })?;
        config
            .load_cert_chain_from_pem_file(cert.to_string_lossy().as_ref())
            .map_err(|e| TestbenchError::TlsLoadCert {
                path: cert.to_string_lossy().into_owned(),
                source: e,
            })?;
        config
            .load_priv_key_from_pem_file(key.to_string_lossy().as_ref())
            .map_err(|e| TestbenchError::TlsLoadCert {
                path: key.to_string_lossy().into_owned(),
                source: e,
            })?;
    } else {
        config.verify_peer(false);
    }
    Ok(config)
}

/// Drains `conn`'s outgoing datagrams to `from`, counting bytes.
async fn flush(
    conn: &mut quiche::Connection,
    socket: &UdpSocket,
    to: SocketAddr,
    metrics: &MetricsStore,
) {
    let mut out = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, info) = match conn.send(&mut out) {
            Ok(v) => v,
            Err(quiche::Error::Done) => break,
            Err(e) => {
                log::warn!("quiche send error: {e}");
                break;
            }
        };
        if let Err(e) = socket.send_to(&out[..len], info.to).await {
            log::warn!("udp send to {to} failed: {e}");
            break;
        }
        metrics.add_bytes_sent(len as u64);
    }
}

/// Reads every readable stream, routing each payload through the
/// connection's FEC decoder and discarding the (possibly recovered) bytes.
fn drain_streams(client: &mut ClientConn, metrics: &MetricsStore) {
    let group_size = FecConfig::default().group_size;
    let mut buf = [0u8; 65535];
    for stream_id in client.conn.readable() {
        loop {
            match client.conn.stream_recv(stream_id, &mut buf) {
                Ok((len, _fin)) => {
                    metrics.inc_packets_received();
                    let payload = &buf[..len];
                    let recovered = if repair::is_repair_packet(payload) {
                        metrics.inc_fec_repair_received();
                        match repair::decode(payload) {
                            Ok((header, symbol)) => {
                                client.fec.add_repair_packet(header.group_id, header.k, symbol)
                            }
                            Err(e) => {
                                log::debug!("malformed repair packet on stream {stream_id}: {e}");
                                None
                            }
                        }
                    } else if len >= 8 {
                        let seq = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                        let group_id = seq / group_size as u64;
                        let slot = (seq % group_size as u64) as u8;
                        client
                            .fec
                            .add_data_packet(group_id, slot, group_size, payload)
                    } else {
                        None
                    };
                    if recovered.is_some() {
                        metrics.inc_fec_recovered();
                    }
                    let unrecoverable_now = client.fec.metrics().groups_unrecoverable;
                    if unrecoverable_now > client.fec_unrecoverable_seen {
                        for _ in 0..(unrecoverable_now - client.fec_unrecoverable_seen) {
                            metrics.inc_fec_recovery_failed();
                        }
                        client.fec_unrecoverable_seen = unrecoverable_now;
                    }
                }
                Err(quiche::Error::Done) => break,
                Err(e) => {
                    log::debug!("stream {stream_id} recv error: {e}");
                    break;
                }
            }
        }
    }
}

/// Runs the reference server until `cancel` fires. Binds once and
/// demultiplexes datagrams by source address into per-client connections.
pub async fn run(cli: Arc<Cli>, metrics: Arc<MetricsStore>, cancel: CancellationToken) {
    let addr: SocketAddr = match cli.addr.parse() {
        Ok(a) => a,
        Err(e) => {
            log::error!("invalid bind address {}: {e}", cli.addr);
            return;
        }
    };
    let socket = match bind_tuned_udp_socket(addr).and_then(UdpSocket::from_std) {
        Ok(s) => s,
        Err(e) => {
            metrics.inc_error("udp_socket");
            log::error!("bind {addr} failed: {e}");
            return;
        }
    };
    let local_addr = socket.local_addr().unwrap_or(addr);

    let mut config = match build_quiche_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            log::error!("server config error: {e}");
            return;
        }
    };

    let mut clients: HashMap<SocketAddr, ClientConn> = HashMap::new();
    let mut buf = [0u8; READ_BUF_LEN];
    let mut reap_interval = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reap_interval.tick() => {
                clients.retain(|_, c| {
                    let alive = !c.conn.is_closed() && c.last_seen.elapsed() < Duration::from_secs(60);
                    if !alive {
                        log::debug!("reaping idle connection");
                    }
                    alive
                });
            }
            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("udp recv error: {e}");
                        continue;
                    }
                };
                metrics.add_bytes_received(len as u64);

                let recv_info = quiche::RecvInfo { from, to: local_addr };

                let client = match clients.get_mut(&from) {
                    Some(c) => c,
                    None => {
                        let scid_bytes: [u8; quiche::MAX_CONN_ID_LEN] = rand::random();
                        let scid = quiche::ConnectionId::from_vec(scid_bytes.to_vec());
                        let conn = match quiche::accept(&scid, None, local_addr, from, &mut config) {
                            Ok(c) => c,
                            Err(e) => {
                                metrics.inc_error("quic_handshake");
                                log::warn!("accept from {from} failed: {e}");
                                continue;
                            }
                        };
                        clients.insert(from, ClientConn::new(conn));
                        clients.get_mut(&from).unwrap()
                    }
                };

                client.last_seen = Instant::now();
                if let Err(e) = client.conn.recv(&mut buf[..len], recv_info) {
                    log::warn!("quiche recv from {from} failed: {e}");
                    continue;
                }

                let was_established = client.conn.is_established();
                drain_streams(client, &metrics);
                flush(&mut client.conn, &socket, from, &metrics).await;
                if !was_established && client.conn.is_established() {
                    metrics.inc_handshake();
                    metrics.inc_one_rtt();
                }
            }
        }
    }

    for (addr, mut client) in clients.drain() {
        let _ = client.conn.close(true, 0x00, b"shutting down");
        flush(&mut client.conn, &socket, addr, &metrics).await;
    }
}
