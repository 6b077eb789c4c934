//! X protocol framing
//!
//! X protocol messages are framed as a 4-byte little-endian length (which
//! counts the type byte and payload) followed by one message type byte and
//! a protobuf-encoded payload. The router never decodes the payload; it
//! only needs to recognize the client's capability negotiation message that
//! requests TLS.

/// Size of the length prefix
pub const LENGTH_SIZE: usize = 4;

/// Length prefix plus message type byte
pub const HEADER_SIZE: usize = LENGTH_SIZE + 1;

/// Client message type: `CON_CAPABILITIES_GET`
pub const CON_CAPABILITIES_GET: u8 = 1;

/// Client message type: `CON_CAPABILITIES_SET`
pub const CON_CAPABILITIES_SET: u8 = 2;

/// Payload length of a message, excluding the length prefix itself.
/// The on-wire length field counts the type byte, so the byte count that
/// follows the 4-byte prefix is exactly this value.
#[must_use]
pub fn payload_len(message: &[u8]) -> usize {
    debug_assert!(message.len() >= LENGTH_SIZE);
    u32::from_le_bytes([message[0], message[1], message[2], message[3]]) as usize
}

/// Whether a capability payload names the `tls` capability.
///
/// The capability name appears as a length-delimited protobuf string; a
/// plain substring scan is sufficient to spot it without decoding.
#[must_use]
pub fn mentions_tls(payload: &[u8]) -> bool {
    payload.windows(3).any(|w| w == b"tls")
}

/// Frame a payload into an X protocol message
#[must_use]
pub fn build_message(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&((payload.len() as u32) + 1).to_le_bytes());
    buf.push(msg_type);
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let msg = build_message(CON_CAPABILITIES_SET, b"hello");
        assert_eq!(msg.len(), HEADER_SIZE + 5);
        assert_eq!(payload_len(&msg), 6);
        assert_eq!(msg[LENGTH_SIZE], CON_CAPABILITIES_SET);
    }

    #[test]
    fn test_mentions_tls() {
        assert!(mentions_tls(b"\x0a\x03tls\x01\x01"));
        assert!(!mentions_tls(b"\x0a\x04auth"));
        assert!(!mentions_tls(b"tl"));
    }
}
