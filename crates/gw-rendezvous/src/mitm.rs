//! Man-in-the-middle session (§4.5, L7): re-terminates a rendezvous
//! session against an upstream target while presenting the MITM's own
//! identity to the client.

use std::net::SocketAddr;

use crate::handshake::InitiatorHandshake;

/// One man-in-the-middle session: a client-facing leg (already
/// established by the normal responder handshake) paired with an
/// initiator-side leg this engine opens against the upstream target.
pub struct MitmSession {
    client_session_id: u32,
    upstream_addr: SocketAddr,
    upstream_session_id: Option<u32>,
    upstream_handshake: InitiatorHandshake,
    client_to_upstream_keys: Option<([u8; 16], [u8; 16])>,
    mitm_shared_secret: Vec<u8>,
}

impl MitmSession {
    /// Begin a MITM session: the client-facing leg is already
    /// established elsewhere; this opens the upstream-facing leg's
    /// handshake.
    ///
    /// # Errors
    ///
    /// Propagates [`gw_crypto::CryptoError`] if the upstream handshake's
    /// key material can't be generated.
    pub fn new(client_session_id: u32, upstream_addr: SocketAddr, mitm_shared_secret: Vec<u8>) -> Result<Self, gw_crypto::CryptoError> {
        Ok(Self {
            client_session_id,
            upstream_addr,
            upstream_session_id: None,
            upstream_handshake: InitiatorHandshake::new()?,
            client_to_upstream_keys: None,
            mitm_shared_secret,
        })
    }

    /// The upstream target this session is bridging to.
    #[must_use]
    pub fn upstream_addr(&self) -> SocketAddr {
        self.upstream_addr
    }

    /// The tag to place in the outbound initiator-hello toward the
    /// upstream.
    #[must_use]
    pub fn upstream_tag(&self) -> &[u8; 16] {
        self.upstream_handshake.tag()
    }

    /// This leg's nonce, for the initiator-initial-keying chunk toward
    /// the upstream.
    #[must_use]
    pub fn upstream_nonce(&self) -> &[u8] {
        self.upstream_handshake.nonce()
    }

    /// This leg's certificate, for the initiator-initial-keying chunk
    /// toward the upstream.
    #[must_use]
    pub fn upstream_certificate(&self) -> &gw_crypto::Certificate {
        self.upstream_handshake.certificate()
    }

    /// Complete the upstream leg once its responder-initial-keying
    /// arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream's nonce doesn't carry a usable DH
    /// public number.
    pub fn on_upstream_keying(&mut self, upstream_session_id: u32, responder_nonce: &[u8]) -> Result<(), crate::error::HandshakeError> {
        let (_, encode, decode) = self.upstream_handshake.on_responder_keying(responder_nonce)?;
        self.upstream_session_id = Some(upstream_session_id);
        self.client_to_upstream_keys = Some((encode, decode));
        Ok(())
    }

    /// True once both legs have completed their handshakes.
    #[must_use]
    pub fn is_bridged(&self) -> bool {
        self.upstream_session_id.is_some()
    }

    /// The upstream leg's session id, once its handshake has completed.
    #[must_use]
    pub fn upstream_session_id(&self) -> Option<u32> {
        self.upstream_session_id
    }

    /// `(encode, decode)` keys for the upstream leg, once its handshake
    /// has completed: `encode` encrypts packets sent to upstream,
    /// `decode` decrypts packets received from it.
    #[must_use]
    pub fn upstream_keys(&self) -> Option<([u8; 16], [u8; 16])> {
        self.client_to_upstream_keys
    }

    /// Rewrite a forwarded-hello-response's carried identity so the
    /// client sees this MITM's own session id rather than the upstream's
    /// (§4.5 "Rewrites the peer identity").
    #[must_use]
    pub fn rewrite_forwarded_identity(&self, chunk_payload: &mut [u8]) {
        if chunk_payload.len() >= 4 {
            chunk_payload[..4].copy_from_slice(&self.client_session_id.to_be_bytes());
        }
    }

    /// Recompute a shared-key-derived NetGroup identifier over the MITM's
    /// own shared secret, so client and upstream legs see mutually
    /// consistent identifiers that don't leak the true upstream identity
    /// (§4.5 "recompute the NetGroup identifier").
    #[must_use]
    pub fn rewrite_netgroup_identifier(&self, original: &[u8]) -> [u8; 32] {
        gw_crypto::hmac_sha256(&self.mitm_shared_secret, original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewritten_identity_carries_the_client_session_id() {
        let session = MitmSession::new(0xAABBCCDD, "127.0.0.1:1935".parse().unwrap(), vec![1, 2, 3]).unwrap();
        let mut payload = vec![0u8; 8];
        session.rewrite_forwarded_identity(&mut payload);
        assert_eq!(&payload[..4], &0xAABB_CCDDu32.to_be_bytes());
    }

    #[test]
    fn netgroup_rewrite_is_deterministic_per_secret() {
        let session = MitmSession::new(1, "127.0.0.1:1935".parse().unwrap(), vec![9, 9, 9]).unwrap();
        let a = session.rewrite_netgroup_identifier(b"peer-id");
        let b = session.rewrite_netgroup_identifier(b"peer-id");
        assert_eq!(a, b);
    }
}
