//! Narrowband variable-bitrate audio: the mode-to-bit-length table used
//! for the wideband→narrowband truncation fallback (§4.7, §GLOSSARY),
//! and the optional injected transcoder used when a real codec is
//! available.

/// Bits occupied by one narrowband VBR frame's body, indexed by mode
/// (the low 4 bits of the frame's first byte). Modes 9 and above are
/// reserved and carry no payload.
const MODE_BIT_LENGTH: [u16; 9] = [5, 43, 119, 160, 220, 300, 364, 492, 79];

/// Bits occupied by a narrowband VBR frame of the given mode, or `0` for
/// a reserved mode (9 or above).
#[must_use]
pub fn mode_bit_length(mode: u8) -> u16 {
    MODE_BIT_LENGTH.get(mode as usize).copied().unwrap_or(0)
}

/// Read the 4-bit mode indicator from a wideband VBR frame's header
/// byte.
#[must_use]
pub fn mode_of(frame: &[u8]) -> Option<u8> {
    frame.first().map(|&b| b & 0x0f)
}

/// Truncate a wideband VBR frame down to its narrowband sub-frame by
/// dropping the bits beyond `mode_bit_length(mode)`, used when no
/// [`AudioCodecModule`] is available to do a real transcode (§4.7,
/// "strip the wideband sub-frame").
///
/// Returns `None` if the frame is empty or its mode is reserved.
#[must_use]
pub fn strip_wideband_to_narrowband(frame: &[u8]) -> Option<Vec<u8>> {
    let mode = mode_of(frame)?;
    let bits = mode_bit_length(mode);
    if bits == 0 {
        return None;
    }
    let header_bits = 8u16;
    let total_bits = header_bits + bits;
    let total_bytes = usize::from(total_bits.div_ceil(8));
    if total_bytes > frame.len() {
        return Some(frame.to_vec());
    }
    Some(frame[..total_bytes].to_vec())
}

/// A real variable-bitrate audio codec, injected when available. When
/// absent, the bridge falls back to the mode-table truncation above for
/// wideband→narrowband, and simply cannot transcode to/from companded
/// formats at all (§4.7: "Transcoding is required if and only if the
/// outbound format is companded and the codec module is available").
pub trait AudioCodecModule: Send + Sync {
    /// Decode one VBR frame to linear 16-bit PCM at the codec's native
    /// rate.
    fn decode(&self, frame: &[u8]) -> Vec<i16>;

    /// Encode linear 16-bit PCM at the codec's native rate to one VBR
    /// frame.
    fn encode(&self, pcm: &[i16]) -> Vec<u8>;

    /// Resample linear PCM from `from_rate` to `to_rate`.
    fn resample(&self, pcm: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_table_matches_documented_values() {
        assert_eq!(mode_bit_length(0), 5);
        assert_eq!(mode_bit_length(1), 43);
        assert_eq!(mode_bit_length(8), 79);
        assert_eq!(mode_bit_length(9), 0);
        assert_eq!(mode_bit_length(15), 0);
    }

    #[test]
    fn stripping_a_reserved_mode_yields_nothing() {
        let frame = [0x09, 0xff, 0xff];
        assert_eq!(strip_wideband_to_narrowband(&frame), None);
    }

    #[test]
    fn stripping_truncates_to_the_narrowband_length() {
        let frame = vec![0x00; 20];
        let stripped = strip_wideband_to_narrowband(&frame).unwrap();
        assert_eq!(stripped.len(), 2);
    }
}
