//! Network-layer framing: flags/timestamp/echo header plus the chunk
//! sequence carried inside a decrypted packet (§4.3).

use crate::error::PacketError;
use crate::packet::is_padding_sentinel;

/// Chunk type bytes the engine understands (§4.3).
pub mod chunk_type {
    /// Initiator hello (handshake).
    pub const INITIATOR_HELLO: u8 = 0x30;
    /// Responder hello (handshake).
    pub const RESPONDER_HELLO: u8 = 0x70;
    /// Initiator initial keying.
    pub const INITIATOR_INITIAL_KEYING: u8 = 0x38;
    /// Responder initial keying.
    pub const RESPONDER_INITIAL_KEYING: u8 = 0x78;
    /// Forwarded initiator hello (rendezvous relay).
    pub const FORWARDED_INITIATOR_HELLO: u8 = 0x0f;
    /// Forwarded hello response (rendezvous relay).
    pub const FORWARDED_HELLO_RESPONSE: u8 = 0x71;
    /// User data, new flow or full-header continuation.
    pub const USER_DATA_FULL: u8 = 0x10;
    /// User data, continuation with implicit stage increment.
    pub const USER_DATA_CONTINUATION: u8 = 0x11;
    /// Acknowledgement.
    pub const ACKNOWLEDGEMENT: u8 = 0x51;
    /// Negative acknowledgement (flow rejected by receiver).
    pub const NEGATIVE_ACK: u8 = 0x5e;
    /// Keep-alive probe.
    pub const KEEPALIVE_PROBE: u8 = 0x01;
    /// Keep-alive response.
    pub const KEEPALIVE_RESPONSE: u8 = 0x41;
    /// Session failed, reported by the peer that noticed.
    pub const SESSION_FAILED_BY_PEER: u8 = 0x0c;
    /// Session died notification.
    pub const SESSION_DIED: u8 = 0x4c;
}

/// Flags byte values (§GLOSSARY "Flags byte in the rendezvous network
/// layer").
pub mod flags {
    /// Setup / handshake marker. Always carries a timestamp, never an
    /// echo.
    pub const HANDSHAKE: u8 = 0x0b;
    /// In-session, server to client, no echo.
    pub const SERVER_NO_ECHO: u8 = 0x4a;
    /// In-session, server to client, echo present.
    pub const SERVER_ECHO: u8 = 0x4e;
    /// Low nibble for in-session client to server, no echo (`xxxx1001`).
    pub const CLIENT_NO_ECHO_LOW: u8 = 0x09;
    /// Low nibble for in-session client to server, echo present
    /// (`xxxx1101`).
    pub const CLIENT_ECHO_LOW: u8 = 0x0d;
    /// The bit distinguishing echo-present from no-echo in every pattern
    /// above.
    pub const ECHO_BIT: u8 = 0x04;

    /// True if `flags` carries a timestamp echo alongside the timestamp.
    #[must_use]
    pub fn echo_present(flags: u8) -> bool {
        flags & ECHO_BIT != 0
    }
}

/// One `type(1) | size(2) | payload(size)` chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// One of the [`chunk_type`] constants.
    pub kind: u8,
    /// Raw chunk payload.
    pub payload: Vec<u8>,
}

/// The decrypted `flags | timestamp | [echo] | chunks…` region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkLayer {
    /// Flags byte, see [`flags`].
    pub flags: u8,
    /// Sender's relative timestamp, in the protocol's quarter-millisecond
    /// units.
    pub timestamp: u16,
    /// Echo of the last timestamp the sender received, when
    /// [`flags::echo_present`] is true.
    pub timestamp_echo: Option<u16>,
    /// Chunks carried by this packet, in wire order.
    pub chunks: Vec<Chunk>,
}

impl NetworkLayer {
    /// Parse a decrypted region (post checksum-stripping); stops at the
    /// first padding sentinel or end of buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::TooShort`] if the flags/timestamp/echo
    /// header is truncated, or [`PacketError::TruncatedChunk`] if a
    /// chunk's declared size runs past the buffer.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < 3 {
            return Err(PacketError::TooShort(data.len()));
        }
        let flags_byte = data[0];
        let timestamp = u16::from_be_bytes([data[1], data[2]]);
        let mut offset = 3;

        let timestamp_echo = if flags::echo_present(flags_byte) {
            if data.len() < offset + 2 {
                return Err(PacketError::TooShort(data.len()));
            }
            let echo = u16::from_be_bytes([data[offset], data[offset + 1]]);
            offset += 2;
            Some(echo)
        } else {
            None
        };

        let mut chunks = Vec::new();
        while offset < data.len() {
            let kind = data[offset];
            if is_padding_sentinel(kind) {
                break;
            }
            if data.len() < offset + 3 {
                return Err(PacketError::TruncatedChunk { offset, size: 0 });
            }
            let size = u16::from_be_bytes([data[offset + 1], data[offset + 2]]) as usize;
            let payload_start = offset + 3;
            if data.len() < payload_start + size {
                return Err(PacketError::TruncatedChunk { offset, size });
            }
            chunks.push(Chunk {
                kind,
                payload: data[payload_start..payload_start + size].to_vec(),
            });
            offset = payload_start + size;
        }

        Ok(Self {
            flags: flags_byte,
            timestamp,
            timestamp_echo,
            chunks,
        })
    }

    /// Serialize back to wire form. Padding is applied later, by the
    /// packet envelope.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.chunks.iter().map(|c| 3 + c.payload.len()).sum::<usize>());
        out.push(self.flags);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        if let Some(echo) = self.timestamp_echo {
            out.extend_from_slice(&echo.to_be_bytes());
        }
        for chunk in &self.chunks {
            out.push(chunk.kind);
            out.extend_from_slice(&(chunk.payload.len() as u16).to_be_bytes());
            out.extend_from_slice(&chunk.payload);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_chunk_with_echo() {
        let layer = NetworkLayer {
            flags: flags::SERVER_ECHO,
            timestamp: 1000,
            timestamp_echo: Some(500),
            chunks: vec![Chunk {
                kind: chunk_type::KEEPALIVE_PROBE,
                payload: vec![],
            }],
        };
        let wire = layer.encode();
        let parsed = NetworkLayer::parse(&wire).unwrap();
        assert_eq!(parsed, layer);
    }

    #[test]
    fn parse_stops_at_padding_sentinel() {
        let mut wire = vec![flags::HANDSHAKE, 0, 1];
        wire.push(chunk_type::USER_DATA_FULL);
        wire.extend_from_slice(&[0, 2]);
        wire.extend_from_slice(&[9, 9]);
        wire.extend_from_slice(&[0xff; 5]);
        let parsed = NetworkLayer::parse(&wire).unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].payload, vec![9, 9]);
    }

    #[test]
    fn echo_bit_matches_documented_patterns() {
        assert!(!flags::echo_present(flags::HANDSHAKE));
        assert!(!flags::echo_present(flags::SERVER_NO_ECHO));
        assert!(flags::echo_present(flags::SERVER_ECHO));
        assert!(!flags::echo_present(0xF0 | flags::CLIENT_NO_ECHO_LOW));
        assert!(flags::echo_present(0xF0 | flags::CLIENT_ECHO_LOW));
    }

    #[test]
    fn truncated_chunk_size_is_rejected() {
        let mut wire = vec![flags::HANDSHAKE, 0, 0];
        wire.push(chunk_type::USER_DATA_FULL);
        wire.extend_from_slice(&[0, 10]);
        wire.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            NetworkLayer::parse(&wire),
            Err(PacketError::TruncatedChunk { .. })
        ));
    }
}
