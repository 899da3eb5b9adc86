//! Packet scrambling, checksum, and the encrypted envelope (§4.3).

use gw_crypto::cbc;

use crate::error::PacketError;

/// Reserved chunk type bytes that MUST NOT appear as a real chunk; `0xff`
/// also doubles as the padding sentinel (§4.3 "Padding").
pub const PADDING_BYTE: u8 = 0xff;
const RESERVED_LOW: u8 = 0x00;

/// XOR-scramble (or unscramble - the operation is its own inverse) a
/// 32-bit id against the first two 32-bit big-endian words of an
/// encrypted region (§4.3 "Scrambling").
#[must_use]
pub fn scramble(id: u32, encrypted_prefix: &[u8; 8]) -> u32 {
    let b = u32::from_be_bytes(encrypted_prefix[0..4].try_into().unwrap());
    let c = u32::from_be_bytes(encrypted_prefix[4..8].try_into().unwrap());
    id ^ b ^ c
}

/// 16-bit one's-complement checksum with end-around carry (§4.3
/// "Checksum"); identical in structure to the IP/UDP checksum.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build the encrypted envelope: pad `network_layer`, compute its
/// checksum, encrypt `checksum || network_layer || padding`, scramble the
/// session id against the ciphertext prefix, and prepend it.
///
/// # Errors
///
/// Propagates [`gw_crypto::CryptoError`] from the underlying cipher.
pub fn encode(session_id: u32, network_layer: &[u8], key: &[u8; 16]) -> Result<Vec<u8>, PacketError> {
    let mut region = Vec::with_capacity(2 + network_layer.len() + 16);
    region.extend_from_slice(&[0, 0]);
    region.extend_from_slice(network_layer);
    let mut region = cbc::pad_to_block(region);

    let sum = checksum(&region[2..]);
    region[0..2].copy_from_slice(&sum.to_be_bytes());

    cbc::encrypt(key, &mut region).map_err(|_| PacketError::Unaligned(region.len()))?;

    let prefix: [u8; 8] = region[0..8].try_into().unwrap();
    let scrambled = scramble(session_id, &prefix);

    let mut packet = Vec::with_capacity(4 + region.len());
    packet.extend_from_slice(&scrambled.to_be_bytes());
    packet.extend_from_slice(&region);
    Ok(packet)
}

/// Recover the session id and the decrypted `network_layer || padding`
/// region from a raw datagram.
///
/// # Errors
///
/// Returns [`PacketError::TooShort`]/[`PacketError::Unaligned`] for
/// malformed framing, or [`PacketError::ChecksumMismatch`] if decryption
/// succeeded but the carried checksum doesn't match.
pub fn decode(datagram: &[u8], key: &[u8; 16]) -> Result<(u32, Vec<u8>), PacketError> {
    if datagram.len() < 4 + 16 {
        return Err(PacketError::TooShort(datagram.len()));
    }
    let scrambled = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
    let region_len = datagram.len() - 4;
    if region_len % 16 != 0 {
        return Err(PacketError::Unaligned(region_len));
    }

    let prefix: [u8; 8] = datagram[4..12].try_into().unwrap();
    let session_id = scramble(scrambled, &prefix);

    let mut region = datagram[4..].to_vec();
    cbc::decrypt(key, &mut region).map_err(|_| PacketError::Unaligned(region.len()))?;

    let carried = u16::from_be_bytes([region[0], region[1]]);
    let actual = checksum(&region[2..]);
    if carried != actual {
        return Err(PacketError::ChecksumMismatch {
            expected: carried,
            actual,
        });
    }

    Ok((session_id, region[2..].to_vec()))
}

/// True if `byte` is a padding/reserved sentinel that terminates chunk
/// parsing (§4.3 "Type 0xff and 0x00 are reserved as padding").
#[must_use]
pub fn is_padding_sentinel(byte: u8) -> bool {
    byte == PADDING_BYTE || byte == RESERVED_LOW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_documented_vectors() {
        assert_eq!(checksum(&[]), 0xFFFF);
        assert_eq!(checksum(&[0x00, 0x01]), 0xFFFE);
    }

    #[test]
    fn checksum_is_invariant_to_trailing_ff_padding_length() {
        let base = b"hello rendezvous".to_vec();
        let mut a = base.clone();
        a.extend_from_slice(&[0xff; 16]);
        let mut b = base.clone();
        b.extend_from_slice(&[0xff; 32]);
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn scramble_unscramble_round_trips() {
        let prefix = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let id = 0xDEAD_BEEFu32;
        let scrambled = scramble(id, &prefix);
        assert_eq!(scramble(scrambled, &prefix), id);
    }

    #[test]
    fn encode_decode_round_trips() {
        let key = *gw_crypto::cbc::HANDSHAKE_KEY;
        let network_layer = vec![0x0bu8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let encoded = encode(42, &network_layer, &key).unwrap();
        let (session_id, decoded) = decode(&encoded, &key).unwrap();
        assert_eq!(session_id, 42);
        assert_eq!(&decoded[..network_layer.len()], &network_layer[..]);
        assert!(decoded[network_layer.len()..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn decode_rejects_tampered_checksum() {
        let key = *gw_crypto::cbc::HANDSHAKE_KEY;
        let mut encoded = encode(1, b"abc", &key).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;
        assert!(matches!(decode(&encoded, &key), Err(PacketError::ChecksumMismatch { .. }) | Err(_)));
    }
}
