//! Classic protocol framing and canned packets
//!
//! Every wire packet is a 4-byte header (3-byte little-endian payload
//! length, 1-byte sequence number) followed by the payload. The router
//! builds three packets itself: a generic error packet, the busy error
//! sent when a bind is at capacity, and the fake handshake response used
//! to shed a blocked client's backend connection without leaking
//! credentials.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

/// Packet header size: 3-byte length plus 1-byte sequence number
pub const HEADER_SIZE: usize = 4;

/// First payload byte of an error packet
pub const ERR_PACKET_MARKER: u8 = 0xff;

/// CLIENT_PROTOCOL_41 capability bit
pub const CLIENT_PROTOCOL_41: u32 = 0x0200;

/// CLIENT_CONNECT_WITH_DB capability bit
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0008;

/// Error code sent when a bind is at its connection cap
pub const ER_CON_COUNT: u16 = 1040;

/// Error code sent when no destination is reachable
pub const CR_CONN_HOST_ERROR: u16 = 2003;

/// Payload length from a packet header (little-endian, 3 bytes)
#[must_use]
pub fn payload_len(packet: &[u8]) -> usize {
    debug_assert!(packet.len() >= HEADER_SIZE);
    usize::from(packet[0]) | usize::from(packet[1]) << 8 | usize::from(packet[2]) << 16
}

/// Sequence number from a packet header
#[must_use]
pub fn seqno(packet: &[u8]) -> u8 {
    debug_assert!(packet.len() >= HEADER_SIZE);
    packet[3]
}

/// Capability flags from a client handshake response: a 32-bit
/// little-endian field at payload offset 0.
///
/// # Errors
///
/// Returns `ProtocolError::MalformedCapability` when the packet is too
/// short to carry the field.
pub fn client_capabilities(packet: &[u8]) -> Result<u32, ProtocolError> {
    if packet.len() < HEADER_SIZE + 4 {
        return Err(ProtocolError::MalformedCapability);
    }
    Ok(u32::from_le_bytes([
        packet[HEADER_SIZE],
        packet[HEADER_SIZE + 1],
        packet[HEADER_SIZE + 2],
        packet[HEADER_SIZE + 3],
    ]))
}

/// Frame a payload into a packet with the given sequence number
#[must_use]
pub fn build_packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    let len = payload.len() as u32;
    buf.put_u8((len & 0xff) as u8);
    buf.put_u8((len >> 8 & 0xff) as u8);
    buf.put_u8((len >> 16 & 0xff) as u8);
    buf.put_u8(seq);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Build an error packet: `0xFF`, error code, `#` + SQL state, message.
#[must_use]
pub fn error_packet(seq: u8, code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    debug_assert_eq!(sql_state.len(), 5);
    let mut payload = BytesMut::with_capacity(9 + message.len());
    payload.put_u8(ERR_PACKET_MARKER);
    payload.put_u16_le(code);
    payload.put_u8(b'#');
    payload.put_slice(sql_state.as_bytes());
    payload.put_slice(message.as_bytes());
    build_packet(seq, &payload)
}

/// The busy error returned to a client when the bind is at capacity and
/// the capacity policy is `reject`.
#[must_use]
pub fn busy_error_packet() -> Vec<u8> {
    error_packet(0, ER_CON_COUNT, "08004", "Too many connections to MySQL Router")
}

/// The error returned to a client when every destination failed to
/// connect.
#[must_use]
pub fn no_destination_error_packet() -> Vec<u8> {
    error_packet(
        0,
        CR_CONN_HOST_ERROR,
        "HY000",
        "Can't connect to remote MySQL server",
    )
}

/// The fake handshake response written to the *server* side of a session
/// whose client is blocked by the bind's ACL. It lets the backend finish
/// its handshake bookkeeping and close cleanly without ever seeing client
/// credentials.
#[must_use]
pub fn blocked_client_response() -> Vec<u8> {
    let caps = CLIENT_PROTOCOL_41 | CLIENT_CONNECT_WITH_DB;
    let mut payload = BytesMut::with_capacity(64);
    payload.put_u32_le(caps);
    payload.put_u32_le(16 * 1024 * 1024); // max packet size
    payload.put_u8(8); // charset: latin1
    payload.put_bytes(0, 23); // filler
    payload.put_slice(b"ROUTER\0");
    payload.put_u8(0); // empty auth response
    payload.put_slice(b"fake_router_login\0");
    build_packet(1, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse_roundtrip() {
        let packet = build_packet(3, &[1, 2, 3, 4, 5]);
        assert_eq!(packet.len(), HEADER_SIZE + 5);
        assert_eq!(payload_len(&packet), 5);
        assert_eq!(seqno(&packet), 3);
    }

    #[test]
    fn test_three_byte_length() {
        let payload = vec![0u8; 0x01_02_03];
        let packet = build_packet(0, &payload);
        assert_eq!(&packet[..4], &[0x03, 0x02, 0x01, 0x00]);
        assert_eq!(payload_len(&packet), 0x01_02_03);
    }

    #[test]
    fn test_error_packet_shape() {
        let packet = error_packet(2, 1045, "28000", "Access denied");
        assert_eq!(seqno(&packet), 2);
        assert_eq!(packet[HEADER_SIZE], ERR_PACKET_MARKER);
        assert_eq!(
            u16::from_le_bytes([packet[HEADER_SIZE + 1], packet[HEADER_SIZE + 2]]),
            1045
        );
        assert_eq!(packet[HEADER_SIZE + 3], b'#');
        assert_eq!(&packet[HEADER_SIZE + 4..HEADER_SIZE + 9], b"28000");
        assert!(packet.ends_with(b"Access denied"));
        assert_eq!(payload_len(&packet), packet.len() - HEADER_SIZE);
    }

    #[test]
    fn test_busy_error_packet() {
        let packet = busy_error_packet();
        assert_eq!(seqno(&packet), 0);
        assert_eq!(packet[HEADER_SIZE], ERR_PACKET_MARKER);
        assert_eq!(
            u16::from_le_bytes([packet[HEADER_SIZE + 1], packet[HEADER_SIZE + 2]]),
            ER_CON_COUNT
        );
    }

    #[test]
    fn test_client_capabilities() {
        let mut payload = 0x0000_0a0du32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0, 0, 0, 1]);
        let packet = build_packet(1, &payload);
        assert_eq!(client_capabilities(&packet).unwrap(), 0x0000_0a0d);

        let short = build_packet(1, &[1, 2]);
        assert!(client_capabilities(&short).is_err());
    }

    #[test]
    fn test_blocked_client_response_shape() {
        let packet = blocked_client_response();
        assert_eq!(seqno(&packet), 1);
        let caps = client_capabilities(&packet).unwrap();
        assert_ne!(caps & CLIENT_PROTOCOL_41, 0);

        let payload = &packet[HEADER_SIZE..];
        // username starts after caps(4) + max packet(4) + charset(1) + filler(23)
        assert_eq!(&payload[32..39], b"ROUTER\0");
        assert!(packet.windows(17).any(|w| w == b"fake_router_login"));
    }
}
