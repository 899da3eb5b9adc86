//! The per-call media bridge: ties the negotiated formats to the
//! audio/video direction A/B paths (§4.7).

use std::sync::Arc;

use crate::capability::{AudioLabel, Negotiated, VideoLabel};
use crate::companding::{decode_alaw, decode_ulaw, encode_alaw, encode_ulaw};
use crate::error::Error;
use crate::h264::{split_frame_to_packets, AccessUnitReassembler, AccessUnitOutput, AvcConfigRecord};
use crate::vbr::{strip_wideband_to_narrowband, AudioCodecModule};
use crate::video_proprietary::{Chunker, Dechunker, VideoMessage};

/// One call's media bridge state: the negotiated formats plus whatever
/// direction-specific codec/chunker state each medium needs.
pub struct MediaBridge {
    negotiated: Negotiated,
    codec_module: Option<Arc<dyn AudioCodecModule>>,
    proprietary_chunker: Chunker,
    proprietary_dechunker: Dechunker,
    avc_config: Option<AvcConfigRecord>,
    access_unit_reassembler: AccessUnitReassembler,
}

impl MediaBridge {
    /// Build a bridge for a newly negotiated call.
    #[must_use]
    pub fn new(negotiated: Negotiated, codec_module: Option<Arc<dyn AudioCodecModule>>) -> Self {
        Self {
            negotiated,
            codec_module,
            proprietary_chunker: Chunker::new(),
            proprietary_dechunker: Dechunker::new(),
            avc_config: None,
            access_unit_reassembler: AccessUnitReassembler::new(),
        }
    }

    /// The negotiated formats this bridge was built with.
    #[must_use]
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    /// Audio direction A (streaming→signaling): map one inbound VBR
    /// audio message (leading format-selector byte plus frame body) to
    /// the negotiated outbound companded byte stream, or pass the VBR
    /// frame through unchanged if the negotiated format is itself VBR.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCodecModule`] if the outbound format is
    /// companded, the incoming frame is wideband VBR but the outbound
    /// format is narrowband (requiring a real resample, not a
    /// truncation), and no codec module is attached.
    pub fn audio_direction_a(&self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        match self.negotiated.audio_label() {
            AudioLabel::Speex => {
                // Outbound is VBR; pass through unless downsampling from
                // wideband to narrowband without a codec module.
                if let Some(module) = &self.codec_module {
                    let pcm = module.decode(frame);
                    Ok(module.encode(&pcm))
                } else {
                    strip_wideband_to_narrowband(frame).ok_or(Error::NoCodecModule)
                }
            }
            AudioLabel::Pcmu | AudioLabel::Pcma => {
                let module = self.codec_module.as_ref().ok_or(Error::NoCodecModule)?;
                let pcm = module.decode(frame);
                Ok(match self.negotiated.audio_label() {
                    AudioLabel::Pcmu => encode_ulaw(&pcm),
                    AudioLabel::Pcma => encode_alaw(&pcm),
                    _ => unreachable!(),
                })
            }
            AudioLabel::None => Ok(Vec::new()),
        }
    }

    /// Audio direction B (signaling→streaming): decode one inbound
    /// companded byte and return linear PCM16 for the streaming side to
    /// re-encode at its own selector.
    #[must_use]
    pub fn audio_direction_b(&self, companded: &[u8]) -> Vec<i16> {
        match self.negotiated.audio_label() {
            AudioLabel::Pcmu => decode_ulaw(companded),
            AudioLabel::Pcma => decode_alaw(companded),
            _ => Vec::new(),
        }
    }

    /// Video direction A, proprietary format: chunk one streaming video
    /// message for the signaling transport.
    pub fn video_direction_a_proprietary(&mut self, message: &VideoMessage) -> Option<Vec<Vec<u8>>> {
        matches!(self.negotiated.video_label(), VideoLabel::Default).then(|| self.proprietary_chunker.chunk(message))
    }

    /// Video direction B, proprietary format: feed one inbound fragment.
    pub fn video_direction_b_proprietary(&mut self, fragment: &[u8]) -> Result<Option<VideoMessage>, Error> {
        self.proprietary_dechunker.feed(fragment)
    }

    /// Video direction A, H.264: handle the AVC configuration record
    /// message, caching it and returning the leading SPS/PPS NAL units
    /// to forward.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::H264Reassembly`] from a malformed record.
    pub fn video_direction_a_h264_config(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        let record = AvcConfigRecord::parse(body)?;
        let leading = record.leading_parameter_sets();
        self.avc_config = Some(record);
        Ok(leading)
    }

    /// Video direction A, H.264: handle a key/inter frame message body
    /// (after the 5-byte `frame_type|codec_id, avc_packet_type,
    /// composition_time` prefix has been stripped by the caller).
    ///
    /// # Errors
    ///
    /// Returns [`Error::H264Reassembly`] if no AVC config record has
    /// been seen yet, or the frame body is malformed.
    pub fn video_direction_a_h264_frame(&self, body: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        let record = self.avc_config.as_ref().ok_or(Error::H264Reassembly("frame before avc config record"))?;
        split_frame_to_packets(body, record.nal_length_size)
    }

    /// Video direction B, H.264: feed one inbound RTP-style packet.
    pub fn video_direction_b_h264(&mut self, packet: &crate::h264::IncomingPacket<'_>) -> AccessUnitOutput {
        self.access_unit_reassembler.feed(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Format;

    struct IdentityCodec;
    impl AudioCodecModule for IdentityCodec {
        fn decode(&self, frame: &[u8]) -> Vec<i16> {
            frame.chunks_exact(2).map(|c| i16::from_be_bytes([c[0], c[1]])).collect()
        }
        fn encode(&self, pcm: &[i16]) -> Vec<u8> {
            pcm.iter().flat_map(|s| s.to_be_bytes()).collect()
        }
        fn resample(&self, pcm: &[i16], _from_rate: u32, _to_rate: u32) -> Vec<i16> {
            pcm.to_vec()
        }
    }

    fn pcmu_negotiated() -> Negotiated {
        Negotiated {
            audio: Some(Format { name: "companded mu-law audio", payload_type: 0, clock_rate: 8000, medium: crate::capability::Medium::Audio }),
            video: None,
        }
    }

    #[test]
    fn audio_direction_a_transcodes_vbr_to_companded_with_codec_module() {
        let bridge = MediaBridge::new(pcmu_negotiated(), Some(Arc::new(IdentityCodec)));
        let pcm_bytes: Vec<u8> = vec![0i16, 100, -100].iter().flat_map(|s| s.to_be_bytes()).collect();
        let companded = bridge.audio_direction_a(&pcm_bytes).unwrap();
        assert_eq!(companded.len(), 3);
    }

    #[test]
    fn audio_direction_a_without_codec_module_rejects_companded_target() {
        let bridge = MediaBridge::new(pcmu_negotiated(), None);
        let err = bridge.audio_direction_a(&[0u8; 4]);
        assert!(matches!(err, Err(Error::NoCodecModule)));
    }

    #[test]
    fn video_direction_a_proprietary_is_none_when_not_negotiated() {
        let mut bridge = MediaBridge::new(pcmu_negotiated(), None);
        let message = VideoMessage { kind: 9, time: 0, body: vec![1, 2, 3] };
        assert!(bridge.video_direction_a_proprietary(&message).is_none());
    }
}
