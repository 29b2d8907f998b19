//! Wire-format extensions this core adds on top of the underlying QUIC
//! transport: the `ACK_FREQUENCY`/`IMMEDIATE_ACK` frames, the
//! `min_ack_delay` transport parameter, and the FEC repair packet framing.
//! The base QUIC wire format itself is `quiche`'s responsibility.

pub mod ack_frequency;
pub mod repair;
pub mod varint;
