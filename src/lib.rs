//! Core of the QUIC performance and conformance testbench: load
//! generator, reference server, and measurement pipeline around an
//! embedded `quiche` transport.

pub mod ackfreq;
pub mod client;
pub mod config;
pub mod congestion;
pub mod error;
pub mod fec;
pub mod metrics;
pub mod server;
pub mod sla;
pub mod wire;
