//! Wire protocol inspection
//!
//! The router only parses the first packets of a session: enough to check
//! packet framing and sequence numbers, spot a server-side error packet,
//! and detect a client's TLS upgrade request. Once the handshake settles
//! the inspector is out of the path and bytes flow through untouched.
//!
//! Two protocol families are supported: the classic protocol (3-byte
//! little-endian length plus one sequence byte per packet) and the X
//! protocol (4-byte little-endian length plus one message type byte).

pub mod classic;
pub mod xproto;

use serde::{Deserialize, Serialize};

use crate::addr::{CLASSIC_DEFAULT_PORT, X_DEFAULT_PORT};
use crate::error::ProtocolError;

/// Capability bit a client sets in its handshake response to request a TLS
/// upgrade (classic protocol)
pub const CLIENT_SSL: u32 = 0x0800;

/// Protocol family of a bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Classic client/server protocol (default port 3306)
    Classic,
    /// X protocol (default port 33060)
    X,
}

impl Default for ProtocolKind {
    fn default() -> Self {
        Self::Classic
    }
}

impl ProtocolKind {
    /// Default destination port for this protocol family
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Classic => CLASSIC_DEFAULT_PORT,
            Self::X => X_DEFAULT_PORT,
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classic => write!(f, "classic"),
            Self::X => write!(f, "x"),
        }
    }
}

/// Handshake state tracker for a single session
///
/// Fed every chunk read from either peer until [`handshake_done`] turns
/// true. Each call inspects at most the leading packet header of the chunk;
/// continuation segments of a packet that did not fit in one read are
/// passed through unparsed.
///
/// [`handshake_done`]: HandshakeInspector::handshake_done
#[derive(Debug)]
pub struct HandshakeInspector {
    kind: ProtocolKind,
    buffer_size: usize,
    stream_large_payloads: bool,
    /// Classic: sequence number the next inspected packet must carry
    expected_seq: u8,
    /// X: number of complete leading messages observed
    messages_seen: u8,
    /// Bytes of the current packet still expected in follow-up reads
    remaining: usize,
    handshake_done: bool,
    tls_requested: bool,
    server_error: bool,
}

impl HandshakeInspector {
    /// Create an inspector for one session.
    #[must_use]
    pub fn new(kind: ProtocolKind, buffer_size: usize, stream_large_payloads: bool) -> Self {
        Self {
            kind,
            buffer_size,
            stream_large_payloads,
            expected_seq: 0,
            messages_seen: 0,
            remaining: 0,
            handshake_done: false,
            tls_requested: false,
            server_error: false,
        }
    }

    /// Whether the handshake has settled and inspection is over
    #[must_use]
    pub const fn handshake_done(&self) -> bool {
        self.handshake_done
    }

    /// Whether the client requested a TLS upgrade
    #[must_use]
    pub const fn tls_requested(&self) -> bool {
        self.tls_requested
    }

    /// Whether the server answered the handshake with an error packet
    ///
    /// This is not a failure: the packet is forwarded verbatim and the
    /// session continues until the client closes.
    #[must_use]
    pub const fn server_error_forwarded(&self) -> bool {
        self.server_error
    }

    /// Inspect one chunk read from a peer. The caller forwards the chunk to
    /// the other peer iff this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` when framing or sequencing is broken; the
    /// caller must close both sides.
    pub fn observe(&mut self, data: &[u8], from_server: bool) -> Result<(), ProtocolError> {
        if self.handshake_done {
            return Ok(());
        }

        if self.remaining > 0 {
            // Continuation of a packet whose first segment was already
            // checked; forwarded without parsing.
            self.remaining = self.remaining.saturating_sub(data.len());
            return Ok(());
        }

        match self.kind {
            ProtocolKind::Classic => self.observe_classic(data, from_server),
            ProtocolKind::X => self.observe_x(data, from_server),
        }
    }

    fn observe_classic(&mut self, data: &[u8], from_server: bool) -> Result<(), ProtocolError> {
        if data.len() < classic::HEADER_SIZE {
            return Err(ProtocolError::ShortHeader {
                got: data.len(),
                need: classic::HEADER_SIZE,
            });
        }

        let payload_len = classic::payload_len(data);
        let seq = classic::seqno(data);

        if seq != self.expected_seq {
            return Err(ProtocolError::BadSeqno {
                expected: self.expected_seq,
                got: seq,
            });
        }

        self.track_remainder(classic::HEADER_SIZE + payload_len, data.len())?;

        if from_server
            && payload_len >= 1
            && data.len() > classic::HEADER_SIZE
            && data[classic::HEADER_SIZE] == classic::ERR_PACKET_MARKER
        {
            // Error from the server while handshaking. Not a failed
            // handshake: forward it and treat the exchange as settled.
            self.server_error = true;
            self.expected_seq = 2;
            self.handshake_done = true;
            return Ok(());
        }

        if !from_server && seq == 1 {
            // Client handshake response: a set CLIENT_SSL bit means
            // everything from here on is a TLS stream.
            let caps = classic::client_capabilities(data)?;
            if caps & CLIENT_SSL != 0 {
                self.tls_requested = true;
                self.handshake_done = true;
                return Ok(());
            }
        }

        self.expected_seq = seq.wrapping_add(1);
        if seq >= 2 {
            self.handshake_done = true;
        }
        Ok(())
    }

    fn observe_x(&mut self, data: &[u8], from_server: bool) -> Result<(), ProtocolError> {
        if data.len() < xproto::HEADER_SIZE {
            return Err(ProtocolError::ShortHeader {
                got: data.len(),
                need: xproto::HEADER_SIZE,
            });
        }

        let payload_len = xproto::payload_len(data);
        self.track_remainder(xproto::LENGTH_SIZE + payload_len, data.len())?;

        let msg_type = data[xproto::LENGTH_SIZE];
        if !from_server
            && msg_type == xproto::CON_CAPABILITIES_SET
            && xproto::mentions_tls(&data[xproto::HEADER_SIZE..])
        {
            self.tls_requested = true;
            self.handshake_done = true;
            return Ok(());
        }

        self.messages_seen = self.messages_seen.saturating_add(1);
        if self.messages_seen >= 2 {
            self.handshake_done = true;
        }
        Ok(())
    }

    fn track_remainder(&mut self, total: usize, read: usize) -> Result<(), ProtocolError> {
        if total > read {
            if total > self.buffer_size && !self.stream_large_payloads {
                return Err(ProtocolError::OversizePayload {
                    len: total,
                    max: self.buffer_size,
                });
            }
            self.remaining = total - read;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUF: usize = 16 * 1024;

    fn inspector(kind: ProtocolKind) -> HandshakeInspector {
        HandshakeInspector::new(kind, BUF, true)
    }

    #[test]
    fn test_classic_normal_handshake() {
        let mut insp = inspector(ProtocolKind::Classic);

        let greeting = classic::build_packet(0, &[0x0a, b'8', b'.', b'0', 0]);
        insp.observe(&greeting, true).unwrap();
        assert!(!insp.handshake_done());

        let response = classic::build_packet(1, &[0x0d, 0xa2, 0x00, 0x00, 0, 0, 0, 1]);
        insp.observe(&response, false).unwrap();
        assert!(!insp.handshake_done());

        let ok = classic::build_packet(2, &[0x00, 0x00, 0x00]);
        insp.observe(&ok, true).unwrap();
        assert!(insp.handshake_done());
        assert!(!insp.tls_requested());
        assert!(!insp.server_error_forwarded());
    }

    #[test]
    fn test_classic_bad_seqno() {
        let mut insp = inspector(ProtocolKind::Classic);

        let greeting = classic::build_packet(0, &[0x0a]);
        insp.observe(&greeting, true).unwrap();

        let response = classic::build_packet(3, &[0x0d, 0xa2, 0x00, 0x00]);
        let err = insp.observe(&response, false).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BadSeqno {
                expected: 1,
                got: 3
            }
        );
    }

    #[test]
    fn test_classic_tls_upgrade() {
        let mut insp = inspector(ProtocolKind::Classic);

        let greeting = classic::build_packet(0, &[0x0a]);
        insp.observe(&greeting, true).unwrap();

        // SSL request: CLIENT_SSL set in the capability field
        let caps = (CLIENT_SSL | 0x0200u32).to_le_bytes();
        let mut payload = caps.to_vec();
        payload.extend_from_slice(&[0, 0, 0, 1, 8]);
        let ssl_request = classic::build_packet(1, &payload);
        insp.observe(&ssl_request, false).unwrap();

        assert!(insp.handshake_done());
        assert!(insp.tls_requested());

        // Ciphertext flows through unobserved
        insp.observe(&[0x16, 0x03, 0x01, 0xde, 0xad], false).unwrap();
    }

    #[test]
    fn test_classic_server_error_passthrough() {
        let mut insp = inspector(ProtocolKind::Classic);

        let greeting = classic::build_packet(0, &[0x0a]);
        insp.observe(&greeting, true).unwrap();

        let response = classic::build_packet(1, &[0x0d, 0xa2, 0x00, 0x00]);
        insp.observe(&response, false).unwrap();

        let err_packet = classic::error_packet(2, 1045, "28000", "Access denied");
        insp.observe(&err_packet, true).unwrap();

        assert!(insp.handshake_done());
        assert!(insp.server_error_forwarded());
        assert!(!insp.tls_requested());
    }

    #[test]
    fn test_classic_short_header() {
        let mut insp = inspector(ProtocolKind::Classic);
        let err = insp.observe(&[0x01, 0x00], true).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortHeader { got: 2, .. }));
    }

    #[test]
    fn test_classic_malformed_capability() {
        let mut insp = inspector(ProtocolKind::Classic);

        let greeting = classic::build_packet(0, &[0x0a]);
        insp.observe(&greeting, true).unwrap();

        // Packet 1 too short to carry the 32-bit capability field
        let response = classic::build_packet(1, &[0x0d, 0xa2]);
        let err = insp.observe(&response, false).unwrap_err();
        assert_eq!(err, ProtocolError::MalformedCapability);
    }

    #[test]
    fn test_classic_streamed_large_payload() {
        let mut insp = HandshakeInspector::new(ProtocolKind::Classic, 16, true);

        // 60-byte payload, but only 16 bytes arrive in the first read
        let mut packet = classic::build_packet(0, &vec![0xaa; 60]);
        packet.truncate(16);
        insp.observe(&packet, true).unwrap();

        // Continuation segments are forwarded unparsed: no seqno check even
        // though the bytes do not look like a header
        insp.observe(&[0xaa; 32], true).unwrap();
        insp.observe(&[0xaa; 16], true).unwrap();
        assert!(!insp.handshake_done());

        // Next real packet is inspected again
        let response = classic::build_packet(1, &[0x0d, 0xa2, 0x00, 0x00]);
        insp.observe(&response, false).unwrap();
    }

    #[test]
    fn test_classic_oversize_rejected_when_streaming_disabled() {
        let mut insp = HandshakeInspector::new(ProtocolKind::Classic, 16, false);

        let mut packet = classic::build_packet(0, &vec![0xaa; 60]);
        packet.truncate(16);
        let err = insp.observe(&packet, true).unwrap_err();
        assert!(matches!(err, ProtocolError::OversizePayload { .. }));
    }

    #[test]
    fn test_x_tls_capability_flip() {
        let mut insp = inspector(ProtocolKind::X);

        let msg = xproto::build_message(xproto::CON_CAPABILITIES_SET, b"\x0a\x03tls\x01");
        insp.observe(&msg, false).unwrap();
        assert!(insp.handshake_done());
        assert!(insp.tls_requested());
    }

    #[test]
    fn test_x_two_message_flip() {
        let mut insp = inspector(ProtocolKind::X);

        let get_caps = xproto::build_message(xproto::CON_CAPABILITIES_GET, b"");
        insp.observe(&get_caps, false).unwrap();
        assert!(!insp.handshake_done());

        let caps = xproto::build_message(2, b"capabilities");
        insp.observe(&caps, true).unwrap();
        assert!(insp.handshake_done());
        assert!(!insp.tls_requested());
    }

    #[test]
    fn test_protocol_kind_defaults() {
        assert_eq!(ProtocolKind::Classic.default_port(), 3306);
        assert_eq!(ProtocolKind::X.default_port(), 33060);
        assert_eq!(ProtocolKind::default(), ProtocolKind::Classic);
        assert_eq!(ProtocolKind::Classic.to_string(), "classic");
        assert_eq!(ProtocolKind::X.to_string(), "x");
    }
}
