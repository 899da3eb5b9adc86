//! AES-128-CBC with a zero IV, as used on both the handshake and the
//! per-session rendezvous wire.
//!
//! The handshake cipher uses a fixed, well-known key shared by every peer
//! ("Adobe Systems 02"); per-session ciphers use keys derived in
//! [`crate::kdf`]. Every packet is encrypted independently with an all-zero
//! IV — the scrambled session id plus the per-packet checksum is what
//! stands in for a nonce here, not the IV, so reusing a zero IV across
//! packets on the same key is intentional, not an oversight.

use aes::Aes128;
use cbc::{Decryptor, Encryptor};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};

use crate::CryptoError;

/// The fixed 16-byte ASCII key used for the handshake-phase cipher.
pub const HANDSHAKE_KEY: &[u8; 16] = b"Adobe Systems 02";

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;

/// Encrypt `data` in place with AES-128-CBC, zero IV, no padding.
///
/// `data.len()` MUST be a multiple of 16; callers pad to a block boundary
/// first (see [`crate::pad_to_block`]).
pub fn encrypt(key: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % 16 != 0 {
        return Err(CryptoError::EncryptionFailed);
    }
    let iv = [0u8; 16];
    Aes128CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_mut::<NoPadding>(data, data.len())
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(())
}

/// Decrypt `data` in place with AES-128-CBC, zero IV, no padding.
pub fn decrypt(key: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % 16 != 0 || data.is_empty() {
        return Err(CryptoError::DecryptionFailed);
    }
    let iv = [0u8; 16];
    Aes128CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(())
}

/// Pad `data` with trailing `0xff` bytes so its length is a multiple of 16
/// and at least one padding byte is present (§4.3 "Padding").
#[must_use]
pub fn pad_to_block(mut data: Vec<u8>) -> Vec<u8> {
    let pad_len = 16 - (data.len() % 16);
    data.extend(std::iter::repeat_n(0xffu8, pad_len));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_handshake_key() {
        let plain = b"NetConnection.Connect.Success!!!".to_vec();
        assert_eq!(plain.len() % 16, 0);
        let mut buf = plain.clone();
        encrypt(HANDSHAKE_KEY, &mut buf).unwrap();
        assert_ne!(buf, plain);
        decrypt(HANDSHAKE_KEY, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn padding_always_leaves_one_trailing_byte() {
        let padded = pad_to_block(vec![0u8; 16]);
        assert_eq!(padded.len(), 32);
        assert!(padded[16..].iter().all(|&b| b == 0xff));
    }
}
