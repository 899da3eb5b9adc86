//! The fixed-layout 77-byte certificate blob advertised by the responder
//! during the handshake (§6.2):
//!
//! ```text
//! 01 0A 41 0E | 64 random bytes | 02 15 02 02 15 05 02 15 0E
//! ```

use crate::random::fill_random;
use crate::CryptoError;

/// Total certificate size in bytes.
pub const CERTIFICATE_LEN: usize = 77;

const HEADER: [u8; 4] = [0x01, 0x0A, 0x41, 0x0E];
const TRAILER: [u8; 9] = [0x02, 0x15, 0x02, 0x02, 0x15, 0x05, 0x02, 0x15, 0x0E];
const RANDOM_LEN: usize = 64;

/// A generated (or parsed) responder certificate, carrying the 64 random
/// bytes whose hash becomes the peer identity (§3, Session.Peer identity).
#[derive(Debug, Clone)]
pub struct Certificate {
    bytes: [u8; CERTIFICATE_LEN],
}

impl Certificate {
    /// Mint a new certificate with a fresh random payload.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; CERTIFICATE_LEN];
        bytes[..4].copy_from_slice(&HEADER);
        fill_random(&mut bytes[4..4 + RANDOM_LEN])?;
        bytes[4 + RANDOM_LEN..].copy_from_slice(&TRAILER);
        Ok(Self { bytes })
    }

    /// Parse a certificate received on the wire, validating the fixed
    /// header/trailer bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != CERTIFICATE_LEN {
            return None;
        }
        if data[..4] != HEADER || data[4 + RANDOM_LEN..] != TRAILER {
            return None;
        }
        let mut bytes = [0u8; CERTIFICATE_LEN];
        bytes.copy_from_slice(data);
        Some(Self { bytes })
    }

    /// The full certificate blob, ready to place in an initiator/responder
    /// hello chunk.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CERTIFICATE_LEN] {
        &self.bytes
    }

    /// The 64 random bytes carried in the middle of the certificate.
    #[must_use]
    pub fn random_payload(&self) -> &[u8] {
        &self.bytes[4..4 + RANDOM_LEN]
    }

    /// 32-byte SHA-256 hash of the certificate, used as the peer identity
    /// (§3, Session.Peer identity).
    #[must_use]
    pub fn peer_identity(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hasher.finalize().into()
    }
}
