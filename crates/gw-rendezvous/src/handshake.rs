//! The four-way handshake state machine (§4.3 "Handshake state machine").
//!
//! ```text
//! initial        --0x30 epd=0x0a--> responder-hello (0x70): tag-echo, cookie, certificate
//! cookie-pending --0x38 cookie-echo--> responder-initial-keying (0x78): session id, nonce
//! established    --0x10/0x11/...
//! ```
//!
//! The cookie is minted and handed back before any Diffie-Hellman work
//! happens, so an attacker flooding initiator-hellos only costs a random
//! fill and a certificate clone, not a modexp (§4.3 "Cookie discipline").

use gw_crypto::{Certificate, CryptoError, DhKeyPair};

use crate::cookie::{CookieId, CookieTable};
use crate::error::HandshakeError;

/// `\x03\x1A\x00\x00\x02\x1E\x00\x81\x02\x0D\x02` - the fixed prefix both
/// sides place before their 128-byte DH public number inside a nonce
/// component (§4.3, responder-nonce format).
const NONCE_HEADER: [u8; 11] = [0x03, 0x1A, 0x00, 0x00, 0x02, 0x1E, 0x00, 0x81, 0x02, 0x0D, 0x02];

fn build_nonce(dh_public: &[u8; 128]) -> Vec<u8> {
    let mut nonce = Vec::with_capacity(NONCE_HEADER.len() + 128);
    nonce.extend_from_slice(&NONCE_HEADER);
    nonce.extend_from_slice(dh_public);
    nonce
}

fn extract_dh_public(nonce: &[u8]) -> Option<&[u8]> {
    nonce.len().checked_sub(128).map(|start| &nonce[start..])
}

/// Responder's reply to an initiator-hello: an emitted `0x70` chunk body.
pub struct ResponderHello {
    /// Echo of the initiator's original tag.
    pub tag_echo: Vec<u8>,
    /// Freshly issued anti-flood cookie.
    pub cookie: CookieId,
    /// This responder's certificate.
    pub certificate: Certificate,
}

/// Responder's reply to an initiator-initial-keying: an emitted `0x78`
/// chunk body, plus the derived session keys.
pub struct ResponderKeying {
    /// Session id this responder picked to demultiplex the new session.
    pub session_id: u32,
    /// This responder's nonce, sent back to the initiator.
    pub responder_nonce: Vec<u8>,
    /// Key for encrypting packets this responder sends.
    pub encode_key: [u8; 16],
    /// Key for decrypting packets this responder receives.
    pub decode_key: [u8; 16],
    /// SHA-256 identity of the initiator's certificate.
    pub peer_identity: [u8; 32],
}

/// Server-side (responder) handshake engine. One instance serves every
/// initiator; per-attempt state lives only in the [`CookieTable`].
pub struct Handshake {
    cookies: CookieTable,
    certificate: Certificate,
}

impl Handshake {
    /// Mint a responder identity and an empty cookie table.
    ///
    /// # Errors
    ///
    /// Propagates [`CryptoError`] if certificate generation fails (OS
    /// CSPRNG unavailable).
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Self {
            cookies: CookieTable::new(),
            certificate: Certificate::generate()?,
        })
    }

    /// The cookie table, exposed so the management sweep (§4.4) can evict
    /// expired entries.
    #[must_use]
    pub fn cookies(&self) -> &CookieTable {
        &self.cookies
    }

    /// Handle an initiator-hello (`0x30`, epd-type client-server):
    /// issue a cookie and echo the tag.
    #[must_use]
    pub fn on_initiator_hello(&self, tag: &[u8]) -> ResponderHello {
        ResponderHello {
            tag_echo: tag.to_vec(),
            cookie: self.cookies.issue(),
            certificate: self.certificate.clone(),
        }
    }

    /// Handle an initiator-initial-keying (`0x38`): validate the cookie
    /// echo, read the peer certificate and nonce, derive the DH shared
    /// secret and session keys, and pick a local session id (§4.3).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::UnknownCookie`] if the cookie is unknown
    /// or expired, [`HandshakeError::InvalidPeerCertificate`] if the
    /// initiator's certificate doesn't parse, or
    /// [`HandshakeError::InvalidPeerPublic`] if the initiator's nonce
    /// doesn't carry a usable DH public number.
    pub fn on_initiator_initial_keying(
        &self,
        cookie_echo: &CookieId,
        initiator_certificate: &[u8],
        initiator_nonce: &[u8],
    ) -> Result<ResponderKeying, HandshakeError> {
        if !self.cookies.is_valid(cookie_echo) {
            return Err(HandshakeError::UnknownCookie);
        }
        let certificate = Certificate::parse(initiator_certificate).ok_or(HandshakeError::InvalidPeerCertificate)?;
        let peer_public = extract_dh_public(initiator_nonce).ok_or(HandshakeError::InvalidPeerPublic)?;

        let own_dh = DhKeyPair::generate().map_err(|_| HandshakeError::InvalidPeerPublic)?;
        let shared = own_dh
            .shared_secret(peer_public)
            .map_err(|_| HandshakeError::InvalidPeerPublic)?;
        let responder_nonce = build_nonce(&own_dh.public_bytes());

        // decode key = HMAC(shared, HMAC(responder nonce, initiator nonce))
        // encode key = HMAC(shared, HMAC(initiator nonce, responder nonce))
        let keys = gw_crypto::derive_session_keys(&shared, initiator_nonce, &responder_nonce);

        let mut session_id_bytes = [0u8; 4];
        gw_crypto::random::fill_random(&mut session_id_bytes).map_err(|_| HandshakeError::InvalidPeerPublic)?;
        let session_id = u32::from_be_bytes(session_id_bytes);

        self.cookies.bind_pending_session(cookie_echo, session_id);

        Ok(ResponderKeying {
            session_id,
            responder_nonce,
            encode_key: keys.key_ab,
            decode_key: keys.key_ba,
            peer_identity: certificate.peer_identity(),
        })
    }
}

/// Client-side (initiator) handshake driver, used when this engine opens
/// an outbound leg of its own (man-in-the-middle mode, §4.5).
pub struct InitiatorHandshake {
    dh: DhKeyPair,
    nonce: Vec<u8>,
    tag: [u8; 16],
    certificate: Certificate,
}

impl InitiatorHandshake {
    /// Generate a DH key pair, a random tag, and a certificate for a new
    /// outbound handshake attempt.
    ///
    /// # Errors
    ///
    /// Propagates [`CryptoError`] if key generation, certificate
    /// generation, or random tag generation fails.
    pub fn new() -> Result<Self, CryptoError> {
        let dh = DhKeyPair::generate()?;
        let nonce = build_nonce(&dh.public_bytes());
        let mut tag = [0u8; 16];
        gw_crypto::random::fill_random(&mut tag)?;
        let certificate = Certificate::generate()?;
        Ok(Self { dh, nonce, tag, certificate })
    }

    /// The tag to place in the outbound initiator-hello.
    #[must_use]
    pub fn tag(&self) -> &[u8; 16] {
        &self.tag
    }

    /// This side's nonce, placed in the initiator-component of the
    /// initiator-initial-keying chunk.
    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// This side's certificate, placed in the initiator-initial-keying
    /// chunk so the responder can compute this side's peer identity.
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Finish the handshake once the responder-initial-keying (`0x78`)
    /// arrives, deriving this side's session keys.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidPeerPublic`] if the responder's
    /// nonce doesn't carry a usable DH public number.
    pub fn on_responder_keying(&self, responder_nonce: &[u8]) -> Result<(u32, [u8; 16], [u8; 16]), HandshakeError> {
        let peer_public = extract_dh_public(responder_nonce).ok_or(HandshakeError::InvalidPeerPublic)?;
        let shared = self
            .dh
            .shared_secret(peer_public)
            .map_err(|_| HandshakeError::InvalidPeerPublic)?;

        // encode key = HMAC(shared, HMAC(responder nonce, initiator nonce))
        // decode key = HMAC(shared, HMAC(initiator nonce, responder nonce))
        let keys = gw_crypto::derive_session_keys(&shared, &self.nonce, responder_nonce);
        Ok((0, keys.key_ba, keys.key_ab))
    }
}
