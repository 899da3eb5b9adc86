//! 1024-bit Diffie-Hellman, matching the well-known rendezvous modulus
//! embedded in §6.2 of the specification (g = 2).

use num_bigint_dig::BigUint;
use rand_core::{OsRng, RngCore};

use crate::CryptoError;

const MODULUS_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC7",
    "4020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F14",
    "374FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B",
    "7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF",
);

fn modulus() -> BigUint {
    BigUint::parse_bytes(MODULUS_HEX.as_bytes(), 16).expect("static DH modulus is valid hex")
}

fn generator() -> BigUint {
    BigUint::from(2u8)
}

/// One side's Diffie-Hellman key pair for a single rendezvous handshake.
pub struct DhKeyPair {
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    /// Generate a fresh private exponent and the matching public value.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; 128];
        OsRng.fill_bytes(&mut seed);
        let private = BigUint::from_bytes_be(&seed) % modulus();
        let public = generator().modpow(&private, &modulus());
        Ok(Self { private, public })
    }

    /// This side's public value, big-endian, left-padded to 128 bytes.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 128] {
        let raw = self.public.to_bytes_be();
        let mut out = [0u8; 128];
        out[128 - raw.len()..].copy_from_slice(&raw);
        out
    }

    /// Compute the shared secret `peer_public ^ private mod p`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicValue`] if the peer's value is
    /// zero or not reduced modulo p (a defense against degenerate/garbage
    /// handshake input, not part of the wire format itself).
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer = BigUint::from_bytes_be(peer_public);
        let p = modulus();
        if peer.bits() == 0 || peer >= p {
            return Err(CryptoError::InvalidPublicValue);
        }
        let shared = peer.modpow(&self.private, &p);
        Ok(shared.to_bytes_be())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_shared_secret() {
        let alice = DhKeyPair::generate().unwrap();
        let bob = DhKeyPair::generate().unwrap();

        let s1 = alice.shared_secret(&bob.public_bytes()).unwrap();
        let s2 = bob.shared_secret(&alice.public_bytes()).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn rejects_public_value_not_reduced_mod_p() {
        let alice = DhKeyPair::generate().unwrap();
        let garbage = [0xffu8; 200];
        assert!(alice.shared_secret(&garbage).is_err());
    }
}
