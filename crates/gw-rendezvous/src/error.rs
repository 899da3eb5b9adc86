//! Error types for the rendezvous (UDP) engine.

use thiserror::Error;

/// Top-level rendezvous engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Packet-level framing/crypto error (§4.3).
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Handshake state machine error (§4.4).
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Underlying crypto primitive failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] gw_crypto::CryptoError),

    /// Socket I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Packet scrambling/encryption/checksum errors.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Datagram shorter than the minimum scrambled-id + one AES block.
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    /// Encrypted region length was not a multiple of the AES block size.
    #[error("encrypted region length {0} is not a multiple of 16")]
    Unaligned(usize),

    /// Checksum over the decrypted network layer did not match the
    /// carried value.
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Value carried in the packet.
        expected: u16,
        /// Value recomputed on receipt.
        actual: u16,
    },

    /// A chunk's declared size ran past the end of the network-layer
    /// region.
    #[error("chunk at offset {offset} declares size {size} past buffer end")]
    TruncatedChunk {
        /// Offset the chunk header started at.
        offset: usize,
        /// Declared chunk payload size.
        size: usize,
    },

    /// Chunk type byte was a reserved padding sentinel (`0x00` or `0xff`).
    #[error("reserved chunk type {0:#04x} used as a real chunk")]
    ReservedChunkType(u8),
}

/// Handshake/session-lifecycle errors.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A chunk arrived for a session-establishment step the responder
    /// wasn't expecting in its current state.
    #[error("unexpected chunk type {0:#04x} in state {1}")]
    UnexpectedChunk(u8, &'static str),

    /// The cookie echoed back by the initiator did not match one this
    /// responder issued, or it had already expired.
    #[error("unknown or expired cookie")]
    UnknownCookie,

    /// The peer's Diffie-Hellman public value was degenerate (outside
    /// `[1, p)`).
    #[error("invalid peer public value")]
    InvalidPeerPublic,

    /// No session exists for the scrambled session id carried by a
    /// post-handshake packet.
    #[error("unknown session id {0}")]
    UnknownSession(u32),

    /// The initiator's certificate was malformed (wrong length, or bad
    /// header/trailer bytes).
    #[error("invalid peer certificate")]
    InvalidPeerCertificate,
}
