//! Byte I/O primitives shared by the chunk and command layers (L1).

use tokio::net::TcpStream;

/// A variable-length integer: up to 4 bytes, 7 data bits per byte except
/// the last (which contributes a full 8), continuation flag in the high
/// bit of every non-final byte (§8 "Variable-length integer").
pub mod varint {
    /// Encode `value` (must fit in 29 bits) into its variable-length form.
    #[must_use]
    pub fn encode(value: u32) -> Vec<u8> {
        debug_assert!(value < (1 << 29));
        let mut out = Vec::with_capacity(4);
        if value < 0x80 {
            out.push(value as u8);
        } else if value < 0x4000 {
            out.push((value >> 7 | 0x80) as u8);
            out.push((value & 0x7f) as u8);
        } else if value < 0x20_0000 {
            out.push((value >> 14 | 0x80) as u8);
            out.push(((value >> 7) & 0x7f | 0x80) as u8);
            out.push((value & 0x7f) as u8);
        } else {
            out.push((value >> 22 | 0x80) as u8);
            out.push(((value >> 15) & 0x7f | 0x80) as u8);
            out.push(((value >> 8) & 0x7f | 0x80) as u8);
            out.push((value & 0xff) as u8);
        }
        out
    }

    /// Decode a variable-length integer from the front of `data`, returning
    /// the value and the number of bytes consumed.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<(u32, usize)> {
        let mut result: u32 = 0;
        for (i, &b) in data.iter().enumerate().take(4) {
            if i == 3 {
                result = (result << 8) | u32::from(b);
                return Some((result, i + 1));
            }
            result = (result << 7) | u32::from(b & 0x7f);
            if b & 0x80 == 0 {
                return Some((result, i + 1));
            }
        }
        None
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn round_trips_and_matches_expected_lengths() {
            let cases: &[(u32, usize)] = &[
                (0, 1),
                (1, 1),
                (127, 1),
                (128, 2),
                (16383, 2),
                (16384, 3),
                (2_097_151, 3),
                (2_097_152, 4),
                ((1 << 28) - 1, 4),
            ];
            for &(value, expected_len) in cases {
                let encoded = encode(value);
                assert_eq!(encoded.len(), expected_len, "value={value}");
                let (decoded, consumed) = decode(&encoded).unwrap();
                assert_eq!(decoded, value);
                assert_eq!(consumed, expected_len);
            }
        }
    }
}

/// An owned TCP socket whose close is logged when the owning entity (a
/// [`crate::connection::Connection`]) drops it, so the resource-release
/// hooks required by §5 ("Scoped resources") are visible at every call
/// site rather than implicit in `TcpStream`'s own `Drop`.
pub struct ScopedSocket {
    inner: Option<TcpStream>,
    peer: std::net::SocketAddr,
}

impl ScopedSocket {
    /// Take ownership of an accepted socket.
    #[must_use]
    pub fn new(socket: TcpStream, peer: std::net::SocketAddr) -> Self {
        Self {
            inner: Some(socket),
            peer,
        }
    }

    /// Borrow the underlying socket.
    pub fn get_mut(&mut self) -> &mut TcpStream {
        self.inner.as_mut().expect("socket taken before drop")
    }

    /// Peer address this socket was accepted from.
    #[must_use]
    pub fn peer_addr(&self) -> std::net::SocketAddr {
        self.peer
    }
}

impl Drop for ScopedSocket {
    fn drop(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(peer = %self.peer, "closing streaming connection socket");
        }
    }
}
