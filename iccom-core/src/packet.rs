//! Packet codec: the variable-length sub-records carried inside a
//! package's payload area.
//!
//! Wire layout (4-byte header + payload):
//!
//! ```text
//! u16 BE  payload_length
//! u8      LUN
//! u8      complete:1 | CID:7
//! bytes   payload
//! ```

/// Header size in bytes; a packet's total size is `HEADER_LEN + payload.len()`.
pub const HEADER_LEN: usize = 4;

/// Smallest legal packet: a 4-byte header plus at least one payload byte.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + 1;

/// A channel identifier: 15 bits, `[0, 0x7FFF]`, encoded on the wire as
/// `(LUN << 7) | CID`.
pub type Channel = u16;

/// Largest valid channel id.
pub const MAX_CHANNEL: Channel = 0x7FFF;

/// A packet parsed out of a package payload, borrowing its payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Logical channel this packet belongs to.
    pub channel: Channel,
    /// True if this packet carries the final fragment of its message.
    pub complete: bool,
    /// The packet's payload bytes.
    pub payload: &'a [u8],
}

/// Errors returned while parsing a packet out of a package payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer bytes remain than a header needs.
    TruncatedHeader,
    /// The declared payload length runs past the end of the parse window.
    PayloadOverrun,
    /// The declared payload length is zero (every packet carries ≥ 1 byte).
    EmptyPayload,
}

/// Split a channel id into its wire `(lun, cid)` pair.
fn split_channel(channel: Channel) -> (u8, u8) {
    let lun = (channel >> 7) as u8;
    let cid = (channel & 0x7F) as u8;
    (lun, cid)
}

/// Reassemble a channel id from its wire `(lun, cid)` pair.
fn join_channel(lun: u8, cid: u8) -> Channel {
    ((lun as u16) << 7) | (cid as u16 & 0x7F)
}

/// Write one packet (header + payload) into `dst`, returning the number of
/// bytes written. `dst` must have at least `HEADER_LEN + payload.len()`
/// bytes of room.
pub fn write(dst: &mut [u8], channel: Channel, complete: bool, payload: &[u8]) -> usize {
    let total = HEADER_LEN + payload.len();
    assert!(dst.len() >= total, "packet destination too small");

    let (lun, cid) = split_channel(channel);
    let len = payload.len() as u16;
    dst[0..2].copy_from_slice(&len.to_be_bytes());
    dst[2] = lun;
    dst[3] = if complete { 0x80 | cid } else { cid };
    dst[HEADER_LEN..total].copy_from_slice(payload);
    total
}

/// Parse one packet out of `src`, which may contain trailing bytes beyond
/// this packet (the rest of a package's payload). Returns the parsed
/// packet and the number of bytes it consumed.
pub fn parse(src: &[u8]) -> Result<(Packet<'_>, usize), ParseError> {
    if src.len() < HEADER_LEN {
        return Err(ParseError::TruncatedHeader);
    }
    let len = u16::from_be_bytes([src[0], src[1]]) as usize;
    if len == 0 {
        return Err(ParseError::EmptyPayload);
    }
    let lun = src[2];
    let complete = src[3] & 0x80 != 0;
    let cid = src[3] & 0x7F;
    let total = HEADER_LEN + len;
    if total > src.len() {
        return Err(ParseError::PayloadOverrun);
    }
    let packet = Packet {
        channel: join_channel(lun, cid),
        complete,
        payload: &src[HEADER_LEN..total],
    };
    Ok((packet, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_parse_round_trips() {
        let mut buf = [0u8; 64];
        let n = write(&mut buf, 0x0005, true, &[0x11, 0x22, 0x33]);
        assert_eq!(n, HEADER_LEN + 3);

        let (packet, consumed) = parse(&buf[..n]).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(packet.channel, 0x0005);
        assert!(packet.complete);
        assert_eq!(packet.payload, &[0x11, 0x22, 0x33]);
    }

    #[test]
    fn header_byte_matches_spec_example() {
        // channel 0x0005 -> LUN=0, CID=5; complete=1 -> low byte 0x85.
        let mut buf = [0u8; 16];
        let n = write(&mut buf, 0x0005, true, &[0xAA]);
        assert_eq!(&buf[..n], &[0x00, 0x01, 0x00, 0x85, 0xAA]);
    }

    #[test]
    fn channel_splits_across_lun_and_cid() {
        let channel = (3u16 << 7) | 0x42;
        let mut buf = [0u8; 16];
        let n = write(&mut buf, channel, false, &[1]);
        let (packet, _) = parse(&buf[..n]).unwrap();
        assert_eq!(packet.channel, channel);
        assert!(!packet.complete);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let buf = [0x00u8, 0x05, 0x00];
        assert_eq!(parse(&buf), Err(ParseError::TruncatedHeader));
    }

    #[test]
    fn overrunning_payload_is_rejected() {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&10u16.to_be_bytes()); // claims 10 bytes
        assert_eq!(parse(&buf), Err(ParseError::PayloadOverrun));
    }

    #[test]
    fn zero_length_payload_is_rejected() {
        let buf = [0x00u8, 0x00, 0x00, 0x00];
        assert_eq!(parse(&buf), Err(ParseError::EmptyPayload));
    }

    #[test]
    fn multiple_packets_parse_back_to_back() {
        let mut buf = [0u8; 64];
        let n1 = write(&mut buf, 7, false, b"ab");
        let n2 = write(&mut buf[n1..], 8, true, b"cde");

        let (p1, c1) = parse(&buf[..n1 + n2]).unwrap();
        assert_eq!(p1.channel, 7);
        assert_eq!(c1, n1);

        let (p2, c2) = parse(&buf[c1..c1 + n2]).unwrap();
        assert_eq!(p2.channel, 8);
        assert_eq!(c2, n2);
    }
}
