//! # Gateway Crypto
//!
//! Cryptographic primitives for the rendezvous (UDP peer-to-peer) side of
//! the media gateway.
//!
//! This crate provides:
//! - The fixed-key AES-128-CBC cipher used during the handshake phase
//! - Per-session AES-128-CBC key derivation (HMAC-SHA256 over a
//!   Diffie-Hellman shared secret and the two handshake nonces)
//! - 1024-bit Diffie-Hellman with the well-known modulus from §6.2
//! - The fixed-layout 77-byte responder certificate
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | Handshake cipher | AES-128-CBC, zero IV | fixed key `"Adobe Systems 02"` |
//! | Session cipher | AES-128-CBC, zero IV | key derived per session |
//! | Key exchange | Diffie-Hellman, 1024-bit modulus, g=2 | see [`dh`] |
//! | Key derivation | HMAC-SHA256 | see [`kdf`] |
//!
//! This suite intentionally does not use modern AEAD ciphers: it matches a
//! protocol whose wire format predates them (§6.2, §9 design notes).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cbc;
pub mod certificate;
pub mod dh;
pub mod error;
pub mod kdf;
pub mod random;

pub use certificate::{Certificate, CERTIFICATE_LEN};
pub use dh::DhKeyPair;
pub use error::CryptoError;
pub use kdf::{derive_session_keys, hmac_sha256, SessionKeys};

/// AES-CBC block/key size used throughout this crate.
pub const AES_BLOCK_SIZE: usize = 16;
