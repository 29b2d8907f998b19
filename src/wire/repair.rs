//! FEC repair packet wire format:
//! `0xFE 0xC0` marker, groupID (u64 LE), k (u8), then the XOR symbol.

pub const MARKER: [u8; 2] = [0xFE, 0xC0];
pub const HEADER_LEN: usize = 11; // marker(2) + group_id(8) + k(1)

#[derive(Debug, thiserror::Error)]
pub enum RepairFormatError {
    #[error("buffer too short for repair header")]
    Truncated,
    #[error("missing repair marker")]
    BadMarker,
}

pub struct RepairHeader {
    pub group_id: u64,
    pub k: u8,
}

/// Writes the 11-byte repair header followed by `symbol` into `out`.
pub fn encode(group_id: u64, k: u8, symbol: &[u8], out: &mut Vec<u8>) {
    out.reserve(HEADER_LEN + symbol.len());
    out.extend_from_slice(&MARKER);
    out.extend_from_slice(&group_id.to_le_bytes());
    out.push(k);
    out.extend_from_slice(symbol);
}

/// Parses the header and returns it along with the remaining symbol bytes.
pub fn decode(buf: &[u8]) -> Result<(RepairHeader, &[u8]), RepairFormatError> {
    if buf.len() < HEADER_LEN {
        return Err(RepairFormatError::Truncated);
    }
    if buf[0..2] != MARKER {
        return Err(RepairFormatError::BadMarker);
    }
    let group_id = u64::from_le_bytes(buf[2..10].try_into().unwrap());
    let k = buf[10];
    Ok((RepairHeader { group_id, k }, &buf[HEADER_LEN..]))
}

/// True if `buf` starts with the repair marker bytes.
pub fn is_repair_packet(buf: &[u8]) -> bool {
    buf.len() >= 2 && buf[0..2] == MARKER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_symbol() {
        let symbol = vec![0xAAu8; 128];
        let mut buf = Vec::new();
        encode(42, 10, &symbol, &mut buf);
        assert!(is_repair_packet(&buf));
        let (header, payload) = decode(&buf).unwrap();
        assert_eq!(header.group_id, 42);
        assert_eq!(header.k, 10);
        assert_eq!(payload, symbol.as_slice());
    }

    #[test]
    fn rejects_truncated_or_unmarked_buffers() {
        assert!(matches!(decode(&[0u8; 5]), Err(RepairFormatError::Truncated)));
        let mut bad = vec![0u8; HEADER_LEN];
        bad[0] = 0x00;
        assert!(matches!(decode(&bad), Err(RepairFormatError::BadMarker)));
    }
}
