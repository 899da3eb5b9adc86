//! FlowWriter: the send half of a reliable ordered substream (§4.3
//! "Flow and FlowWriter").

use std::time::{Duration, Instant};

use crate::chunk::chunk_type;
use crate::flow::flag;
use crate::varint7;

/// Maximum payload bytes per outbound fragment (§4.3 "FlowWriter …
/// 1181-byte payload limit").
pub const PAYLOAD_LIMIT: usize = 1181;

/// Base delay for the first retransmit cycle; doubled on each later cycle
/// (§4.3 "starts at 0 ms after the first miss and doubles each cycle").
const RETRANSMIT_BASE: Duration = Duration::from_millis(100);

/// After this many missed-ack cycles, the owning session is failed.
pub const FATAL_RETRANSMIT_CYCLE: u32 = 8;

/// Delay before the `cycle`-th retransmit attempt (0-indexed: cycle 0 is
/// the first retry, sent immediately after the first miss).
#[must_use]
pub fn retransmit_delay(cycle: u32) -> Duration {
    if cycle == 0 {
        Duration::ZERO
    } else {
        RETRANSMIT_BASE * 2u32.saturating_pow(cycle - 1)
    }
}

struct PendingStage {
    stage: u32,
    fragments: Vec<(u8, Vec<u8>)>,
    sent_at: Instant,
    attempts: u32,
}

/// Outcome of checking a [`FlowWriter`] for work to do.
pub enum Tick {
    /// Nothing to retransmit right now.
    Idle,
    /// These `(chunk kind, body)` fragments should be resent verbatim.
    Retransmit(Vec<(u8, Vec<u8>)>),
    /// The flow writer exhausted its retransmit budget; the owning
    /// session must be failed.
    Fatal,
}

/// Send-side state for one flow, producing wire-ready fragments and
/// tracking unacknowledged stages for retransmission.
pub struct FlowWriter {
    flow_id: u32,
    bound_flow_id: Option<u32>,
    signature: Vec<u8>,
    next_stage: u32,
    unacked: Vec<PendingStage>,
    closed: bool,
}

impl FlowWriter {
    /// Create a writer for a new flow, identified on the wire by
    /// `signature` the first time it sends (e.g. a flow-connection or
    /// flow-group signature).
    #[must_use]
    pub fn new(flow_id: u32, signature: Vec<u8>, bound_flow_id: Option<u32>) -> Self {
        Self {
            flow_id,
            bound_flow_id,
            signature,
            next_stage: 0,
            unacked: Vec::new(),
            closed: false,
        }
    }

    /// Split `data` into one or more `0x10`/`0x11` chunk bodies, each
    /// under [`PAYLOAD_LIMIT`] bytes, and advance the send stage.
    /// Returns each fragment paired with the chunk type it must be sent
    /// as: `0x10` when it carries a full header, `0x11` otherwise.
    ///
    /// `end` marks this as the flow's final payload; no further calls are
    /// expected afterward.
    pub fn write(&mut self, data: &[u8], end: bool) -> Vec<(u8, Vec<u8>)> {
        let fragments: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(PAYLOAD_LIMIT).collect()
        };

        let mut out = Vec::with_capacity(fragments.len());
        let start_stage = self.next_stage;
        for (index, fragment) in fragments.iter().enumerate() {
            let stage = self.next_stage;
            let is_first_stage_ever = stage == 0;
            let with_afterpart = index + 1 < fragments.len();
            let is_final_fragment = index + 1 == fragments.len();

            let mut flags = 0u8;
            if is_first_stage_ever {
                flags |= flag::HEADER;
            }
            if with_afterpart {
                flags |= flag::WITH_AFTERPART;
            }
            if stage > start_stage {
                flags |= flag::WITH_BEFOREPART;
            }
            if end && is_final_fragment {
                flags |= flag::END;
                self.closed = true;
            }

            let kind = if flags & flag::HEADER != 0 { chunk_type::USER_DATA_FULL } else { chunk_type::USER_DATA_CONTINUATION };
            out.push((kind, self.encode_fragment(stage, flags, fragment)));
            self.next_stage += 1;
        }

        self.unacked.push(PendingStage {
            stage: self.next_stage - 1,
            fragments: out.clone(),
            sent_at: Instant::now(),
            attempts: 0,
        });

        out
    }

    fn encode_fragment(&self, stage: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&varint7::encode(self.flow_id));
        out.extend_from_slice(&varint7::encode(stage + 1));
        out.extend_from_slice(&varint7::encode(1));
        if stage == 0 {
            out.push(self.signature.len() as u8);
            out.extend_from_slice(&self.signature);
            if let Some(bound) = self.bound_flow_id {
                out.extend_from_slice(&varint7::encode(bound));
            }
        }
        out.push(flags);
        out.extend_from_slice(payload);
        out
    }

    /// Record that the peer acknowledged up to and including `stage`.
    pub fn acknowledge(&mut self, stage: u32) {
        self.unacked.retain(|pending| pending.stage > stage);
    }

    /// True once an `END`-flagged fragment has been sent.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check the oldest unacknowledged stage against the retransmit
    /// schedule, returning fragments to resend or [`Tick::Fatal`] if the
    /// budget is exhausted.
    pub fn tick(&mut self) -> Tick {
        let Some(pending) = self.unacked.first_mut() else {
            return Tick::Idle;
        };
        if pending.attempts >= FATAL_RETRANSMIT_CYCLE {
            return Tick::Fatal;
        }
        let due = pending.sent_at + retransmit_delay(pending.attempts);
        if Instant::now() < due {
            return Tick::Idle;
        }
        pending.attempts += 1;
        pending.sent_at = Instant::now();
        Tick::Retransmit(pending.fragments.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_a_single_fragment_with_header_and_end() {
        let mut writer = FlowWriter::new(7, b"sig".to_vec(), None);
        let fragments = writer.write(b"hello", true);
        assert_eq!(fragments.len(), 1);
        assert!(writer.is_closed());
    }

    #[test]
    fn large_payload_splits_at_the_fragment_limit() {
        let mut writer = FlowWriter::new(7, b"sig".to_vec(), None);
        let data = vec![0u8; PAYLOAD_LIMIT * 2 + 10];
        let fragments = writer.write(&data, true);
        assert_eq!(fragments.len(), 3);
    }

    #[test]
    fn first_fragment_is_full_header_later_ones_are_continuations() {
        let mut writer = FlowWriter::new(7, b"sig".to_vec(), None);
        let data = vec![0u8; PAYLOAD_LIMIT * 2 + 10];
        let fragments = writer.write(&data, true);
        assert_eq!(fragments[0].0, chunk_type::USER_DATA_FULL);
        assert_eq!(fragments[1].0, chunk_type::USER_DATA_CONTINUATION);
        assert_eq!(fragments[2].0, chunk_type::USER_DATA_CONTINUATION);
    }

    #[test]
    fn acknowledging_clears_pending_retransmits() {
        let mut writer = FlowWriter::new(1, b"sig".to_vec(), None);
        writer.write(b"a", false);
        writer.acknowledge(0);
        assert!(matches!(writer.tick(), Tick::Idle));
    }

    #[test]
    fn retransmit_delay_starts_immediate_and_doubles() {
        assert_eq!(retransmit_delay(0), Duration::ZERO);
        assert_eq!(retransmit_delay(1), RETRANSMIT_BASE);
        assert_eq!(retransmit_delay(2), RETRANSMIT_BASE * 2);
        assert_eq!(retransmit_delay(7), RETRANSMIT_BASE * 64);
    }
}
