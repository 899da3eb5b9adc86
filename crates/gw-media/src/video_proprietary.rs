//! Proprietary video chunking (§4.7, Video direction A/B): wraps a
//! streaming message `type | size | time | body` into ≤1000-byte
//! fragments prefixed with the `"RTMP"` magic word, and reverses it.

use crate::error::Error;

const MAGIC: &[u8; 4] = b"RTMP";
const MAX_FRAGMENT: usize = 1000;
const MIN_TOTAL_SIZE: u16 = 12;

/// One streaming-layer video message, ready to be chunked for the
/// signaling transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMessage {
    /// Streaming message type tag.
    pub kind: u32,
    /// Message body length, as it will be embedded in the header.
    pub time: u32,
    /// Message body.
    pub body: Vec<u8>,
}

impl VideoMessage {
    fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.body.len());
        out.extend_from_slice(&self.kind.to_be_bytes());
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.time.to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Per-direction chunker state: tracks the monotonic per-message
/// sequence counter (§4.7 "`seq` is a per-message monotonic 32-bit
/// counter").
#[derive(Debug, Default)]
pub struct Chunker {
    next_seq: u32,
}

impl Chunker {
    /// A fresh chunker with `seq` starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk one message into ordered ≤1000-byte fragments.
    pub fn chunk(&mut self, message: &VideoMessage) -> Vec<Vec<u8>> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let assembled = message.assemble();
        let total_size = assembled.len() as u16;
        let mut fragments = Vec::new();
        let mut cseq: u16 = 0;
        let mut offset = 0usize;
        while offset < assembled.len() || fragments.is_empty() {
            let header_len = if cseq == 0 { 4 + 4 + 2 + 2 } else { 4 + 4 + 2 };
            let data_budget = MAX_FRAGMENT - header_len;
            let end = (offset + data_budget).min(assembled.len());
            let chunk = &assembled[offset..end];

            let mut fragment = Vec::with_capacity(header_len + chunk.len());
            fragment.extend_from_slice(MAGIC);
            fragment.extend_from_slice(&seq.to_be_bytes());
            fragment.extend_from_slice(&cseq.to_be_bytes());
            if cseq == 0 {
                fragment.extend_from_slice(&total_size.to_be_bytes());
            }
            fragment.extend_from_slice(chunk);
            fragments.push(fragment);

            offset = end;
            cseq += 1;
        }
        fragments
    }
}

fn fragment_count(total_size: u16) -> usize {
    let total = usize::from(total_size);
    let first_budget = MAX_FRAGMENT - (4 + 4 + 2 + 2);
    if total <= first_budget {
        return 1;
    }
    let cont_budget = MAX_FRAGMENT - (4 + 4 + 2);
    let remaining = total - first_budget;
    1 + remaining.div_ceil(cont_budget)
}

/// Per-direction dechunker state: buffers fragments of the `seq`
/// currently being reassembled by `cseq`, independent of arrival order,
/// and only emits once every fragment the cseq-0 header announced has
/// arrived (§4.7, Video direction B, "reassembly is order-independent
/// provided no fragment is missing").
#[derive(Debug, Default)]
pub struct Dechunker {
    current_seq: Option<u32>,
    total_size: Option<u16>,
    expected_fragments: Option<usize>,
    fragments: std::collections::HashMap<u16, Vec<u8>>,
}

impl Dechunker {
    /// A fresh dechunker with no sequence in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns `Ok(Some(message))` once every
    /// fragment of the sequence has been seen, `Ok(None)` while still
    /// buffering, or `Err` (dropping the sequence) on a framing
    /// violation.
    pub fn feed(&mut self, fragment: &[u8]) -> Result<Option<VideoMessage>, Error> {
        if fragment.len() < 10 || &fragment[0..4] != MAGIC {
            self.reset();
            return Err(Error::DroppedFragment("bad magic word"));
        }
        let seq = u32::from_be_bytes(fragment[4..8].try_into().unwrap());
        let cseq = u16::from_be_bytes(fragment[8..10].try_into().unwrap());

        if cseq == 0 {
            if fragment.len() < 12 {
                self.reset();
                return Err(Error::DroppedFragment("missing total-size field"));
            }
            let total_size = u16::from_be_bytes(fragment[10..12].try_into().unwrap());
            if total_size < MIN_TOTAL_SIZE {
                self.reset();
                return Err(Error::DroppedFragment("announced total size below minimum"));
            }
            self.current_seq = Some(seq);
            self.total_size = Some(total_size);
            self.expected_fragments = Some(fragment_count(total_size));
            self.fragments.clear();
            self.fragments.insert(0, fragment[12..].to_vec());
        } else {
            if self.current_seq != Some(seq) {
                self.reset();
                return Err(Error::DroppedFragment("continuation for an unknown or abandoned sequence"));
            }
            let Some(expected) = self.expected_fragments else {
                self.reset();
                return Err(Error::DroppedFragment("continuation before an initial fragment"));
            };
            if usize::from(cseq) >= expected {
                self.reset();
                return Err(Error::DroppedFragment("continuation index past the expected fragment count"));
            }
            self.fragments.insert(cseq, fragment[10..].to_vec());
        }

        let Some(expected) = self.expected_fragments else { return Ok(None) };
        if self.fragments.len() < expected {
            return Ok(None);
        }

        let mut buffer = Vec::new();
        for i in 0..expected as u16 {
            buffer.extend_from_slice(&self.fragments[&i]);
        }

        if buffer.len() < 12 {
            self.reset();
            return Err(Error::DroppedFragment("reassembled message shorter than its header"));
        }

        let kind = u32::from_be_bytes(buffer[0..4].try_into().unwrap());
        let size = u32::from_be_bytes(buffer[4..8].try_into().unwrap()) as usize;
        let time = u32::from_be_bytes(buffer[8..12].try_into().unwrap());
        let body = buffer.get(12..12 + size).map(<[u8]>::to_vec).unwrap_or_default();
        self.reset();
        Ok(Some(VideoMessage { kind, time, body }))
    }

    fn reset(&mut self) {
        self.current_seq = None;
        self.total_size = None;
        self.expected_fragments = None;
        self.fragments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_message_round_trips_in_one_fragment() {
        let message = VideoMessage { kind: 9, time: 1234, body: vec![1, 2, 3, 4] };
        let mut chunker = Chunker::new();
        let fragments = chunker.chunk(&message);
        assert_eq!(fragments.len(), 1);

        let mut dechunker = Dechunker::new();
        let out = dechunker.feed(&fragments[0]).unwrap();
        assert_eq!(out, Some(message));
    }

    #[test]
    fn large_message_splits_and_reassembles() {
        let message = VideoMessage { kind: 1, time: 77, body: vec![0xab; 5000] };
        let mut chunker = Chunker::new();
        let fragments = chunker.chunk(&message);
        assert!(fragments.len() > 1);
        assert!(fragments.iter().all(|f| f.len() <= MAX_FRAGMENT));

        let mut dechunker = Dechunker::new();
        let mut result = None;
        for fragment in &fragments {
            result = dechunker.feed(fragment).unwrap();
        }
        assert_eq!(result, Some(message));
    }

    #[test]
    fn scenario_e5_out_of_order_fragments_still_reassemble() {
        let message = VideoMessage { kind: 9, time: 40, body: vec![0xab; 2400] };
        let mut chunker = Chunker::new();
        let fragments = chunker.chunk(&message);
        assert_eq!(fragments.len(), 3);
        assert_eq!(u16::from_be_bytes(fragments[0][10..12].try_into().unwrap()), 2412);

        let mut dechunker = Dechunker::new();
        assert_eq!(dechunker.feed(&fragments[0]).unwrap(), None);
        assert_eq!(dechunker.feed(&fragments[2]).unwrap(), None);
        let out = dechunker.feed(&fragments[1]).unwrap();
        assert_eq!(out, Some(message));
    }

    #[test]
    fn scenario_e5_missing_fragment_never_emits() {
        let message = VideoMessage { kind: 9, time: 40, body: vec![0xab; 2400] };
        let mut chunker = Chunker::new();
        let fragments = chunker.chunk(&message);
        assert_eq!(fragments.len(), 3);

        let mut dechunker = Dechunker::new();
        assert_eq!(dechunker.feed(&fragments[0]).unwrap(), None);
        assert_eq!(dechunker.feed(&fragments[2]).unwrap(), None);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut dechunker = Dechunker::new();
        let mut bogus = vec![b'X', b'X', b'X', b'X'];
        bogus.extend_from_slice(&[0u8; 8]);
        assert!(dechunker.feed(&bogus).is_err());
    }

    #[test]
    fn minimum_total_size_with_no_payload_bytes_is_rejected_not_panicked() {
        let mut fragment = Vec::new();
        fragment.extend_from_slice(MAGIC);
        fragment.extend_from_slice(&0u32.to_be_bytes());
        fragment.extend_from_slice(&0u16.to_be_bytes());
        fragment.extend_from_slice(&MIN_TOTAL_SIZE.to_be_bytes());
        let mut dechunker = Dechunker::new();
        assert!(dechunker.feed(&fragment).is_err());
    }

    #[test]
    fn total_size_below_minimum_is_rejected() {
        let mut fragment = Vec::new();
        fragment.extend_from_slice(MAGIC);
        fragment.extend_from_slice(&0u32.to_be_bytes());
        fragment.extend_from_slice(&0u16.to_be_bytes());
        fragment.extend_from_slice(&4u16.to_be_bytes());
        let mut dechunker = Dechunker::new();
        assert!(dechunker.feed(&fragment).is_err());
    }
}
