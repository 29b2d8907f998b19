//! `ACK_FREQUENCY` and `IMMEDIATE_ACK` frame encodings, and the
//! `min_ack_delay` transport parameter id.

use super::varint::{self, VarIntError};

pub const FRAME_TYPE_ACK_FREQUENCY: u8 = 0xaf;
pub const FRAME_TYPE_IMMEDIATE_ACK: u8 = 0x1f;
pub const TP_MIN_ACK_DELAY: u64 = 0xff04de1b;

/// The `ACK_FREQUENCY` frame body: four varints following the frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrequencyFrame {
    pub sequence_number: u64,
    pub ack_eliciting_threshold: u64,
    pub requested_max_ack_delay_ms: u64,
    pub reordering_threshold: u64,
}

impl AckFrequencyFrame {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), VarIntError> {
        buf.push(FRAME_TYPE_ACK_FREQUENCY);
        varint::write(buf, self.sequence_number)?;
        varint::write(buf, self.ack_eliciting_threshold)?;
        varint::write(buf, self.requested_max_ack_delay_ms)?;
        varint::write(buf, self.reordering_threshold)?;
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), VarIntError> {
        let mut offset = 0;
        if buf.first().copied() != Some(FRAME_TYPE_ACK_FREQUENCY) {
            return Err(VarIntError::BufferTooShort);
        }
        offset += 1;

        let (sequence_number, n) = varint::read(&buf[offset..])?;
        offset += n;
        let (ack_eliciting_threshold, n) = varint::read(&buf[offset..])?;
        offset += n;
        let (requested_max_ack_delay_ms, n) = varint::read(&buf[offset..])?;
        offset += n;
        let (reordering_threshold, n) = varint::read(&buf[offset..])?;
        offset += n;

        Ok((
            AckFrequencyFrame {
                sequence_number,
                ack_eliciting_threshold,
                requested_max_ack_delay_ms,
                reordering_threshold,
            },
            offset,
        ))
    }
}

/// `IMMEDIATE_ACK` carries no payload beyond its type byte.
pub fn encode_immediate_ack(buf: &mut Vec<u8>) {
    buf.push(FRAME_TYPE_IMMEDIATE_ACK);
}

pub fn is_immediate_ack(buf: &[u8]) -> bool {
    buf.first().copied() == Some(FRAME_TYPE_IMMEDIATE_ACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_frequency_round_trips() {
        let frame = AckFrequencyFrame {
            sequence_number: 1,
            ack_eliciting_threshold: 10,
            requested_max_ack_delay_ms: 15,
            reordering_threshold: 0,
        };
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        let (decoded, consumed) = AckFrequencyFrame::decode(&buf).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn immediate_ack_is_a_single_byte() {
        let mut buf = Vec::new();
        encode_immediate_ack(&mut buf);
        assert_eq!(buf, vec![FRAME_TYPE_IMMEDIATE_ACK]);
        assert!(is_immediate_ack(&buf));
    }

    #[test]
    fn wrong_frame_type_is_rejected() {
        assert!(AckFrequencyFrame::decode(&[FRAME_TYPE_IMMEDIATE_ACK]).is_err());
    }
}
