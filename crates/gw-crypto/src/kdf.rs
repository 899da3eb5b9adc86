//! Per-session key derivation (§4.3 "Cryptography").
//!
//! ```text
//! key_ab = HMAC-SHA256(shared, HMAC-SHA256(nonce_a, nonce_b))[:16]
//! key_ba = HMAC-SHA256(shared, HMAC-SHA256(nonce_b, nonce_a))[:16]
//! ```
//!
//! The initiator's encode key equals the responder's decode key and vice
//! versa; callers pick which of `key_ab`/`key_ba` is "encode" based on
//! which side of the handshake they are on.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Raw `HMAC-SHA256(key, data)`, exposed for callers that need it outside
/// the session-key derivation above (e.g. MITM NetGroup identifier
/// rewriting).
#[must_use]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// The pair of session keys derived from one shared secret and the two
/// nonces exchanged during the handshake.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// `HMAC(shared, HMAC(nonce_initiator, nonce_responder))[:16]`
    pub key_ab: [u8; 16],
    /// `HMAC(shared, HMAC(nonce_responder, nonce_initiator))[:16]`
    pub key_ba: [u8; 16],
}

/// Derive both session keys from the Diffie-Hellman shared secret and the
/// initiator/responder nonces.
#[must_use]
pub fn derive_session_keys(shared: &[u8], nonce_initiator: &[u8], nonce_responder: &[u8]) -> SessionKeys {
    let inner_ab = hmac_sha256(nonce_initiator, nonce_responder);
    let inner_ba = hmac_sha256(nonce_responder, nonce_initiator);

    let mut key_ab = [0u8; 16];
    let mut key_ba = [0u8; 16];
    key_ab.copy_from_slice(&hmac_sha256(shared, &inner_ab)[..16]);
    key_ba.copy_from_slice(&hmac_sha256(shared, &inner_ba)[..16]);

    SessionKeys { key_ab, key_ba }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_parties_agree_on_both_keys() {
        let shared = b"shared-secret-bytes";
        let n_i = b"initiator-nonce";
        let n_r = b"responder-nonce";

        let at_initiator = derive_session_keys(shared, n_i, n_r);
        let at_responder = derive_session_keys(shared, n_i, n_r);

        // initiator's decode key == responder's encode key (key_ba), and
        // vice versa for key_ab - both sides compute the identical pair.
        assert_eq!(at_initiator.key_ab, at_responder.key_ab);
        assert_eq!(at_initiator.key_ba, at_responder.key_ba);
        assert_ne!(at_initiator.key_ab, at_initiator.key_ba);
    }
}
