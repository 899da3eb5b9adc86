//! Flow: the receive half of a reliable ordered substream within a
//! session (§4.3 "Flow and FlowWriter").

use std::collections::BTreeMap;

/// Cap on out-of-order fragments buffered per flow before the oldest are
/// dropped and the overrun is logged.
pub const MAX_BUFFERED_FRAGMENTS: usize = 100;

/// Flags carried by a `0x10`/`0x11` user-data chunk.
pub mod flag {
    /// This fragment carries a full header (new flow, or continuing after
    /// a gap).
    pub const HEADER: u8 = 0x80;
    /// This fragment abandons any stages below it that were never
    /// received.
    pub const ABANDONMENT: u8 = 0x04;
    /// This fragment completes the flow; later fragments are ignored.
    pub const END: u8 = 0x02;
    /// This fragment continues a payload item whose first part arrived in
    /// a previous stage.
    pub const WITH_BEFOREPART: u8 = 0x10;
    /// Another fragment continues this payload item in the next stage.
    pub const WITH_AFTERPART: u8 = 0x08;
}

/// One committed payload item assembled from (possibly several)
/// before/after-part fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// The concatenated payload bytes.
    pub payload: Vec<u8>,
}

struct Buffered {
    payload: Vec<u8>,
    flags: u8,
}

/// Receive-side reassembly state for one flow id.
pub struct Flow {
    id: u32,
    next_stage: u32,
    buffered: BTreeMap<u32, Buffered>,
    in_progress: Vec<u8>,
    completed: bool,
    lost_fragments: u64,
    overflow_drops: u64,
}

impl Flow {
    /// Start tracking a new flow id, expecting stage 1 next (stage 0 is
    /// the implicit pre-handshake state).
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            next_stage: 1,
            buffered: BTreeMap::new(),
            in_progress: Vec::new(),
            completed: false,
            lost_fragments: 0,
            overflow_drops: 0,
        }
    }

    /// This flow's id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True once an `END`-flagged fragment has been committed; further
    /// fragments are ignored.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The highest stage committed in order so far, for acknowledging
    /// the sender.
    #[must_use]
    pub fn received_stage(&self) -> u32 {
        self.next_stage.saturating_sub(1)
    }

    /// Count of stages an `ABANDONMENT` fragment reported as permanently
    /// lost.
    #[must_use]
    pub fn lost_fragments(&self) -> u64 {
        self.lost_fragments
    }

    /// Count of out-of-order fragments dropped because the buffer was
    /// full.
    #[must_use]
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops
    }

    /// Feed one received fragment, identified by its stage number and
    /// flags (see [`flag`]). Returns any payload items that became
    /// committable as a result - usually zero or one, more if buffered
    /// fragments cascade into place.
    pub fn on_fragment(&mut self, stage: u32, flags: u8, payload: &[u8]) -> Vec<Commit> {
        if self.completed || stage < self.next_stage {
            return Vec::new();
        }

        if flags & flag::ABANDONMENT != 0 && stage > self.next_stage {
            self.lost_fragments += u64::from(stage - self.next_stage);
            self.next_stage = stage;
            self.buffered.retain(|&buffered_stage, _| buffered_stage >= self.next_stage);
        }

        if stage > self.next_stage {
            if self.buffered.len() >= MAX_BUFFERED_FRAGMENTS {
                tracing::warn!(flow = self.id, stage, "flow fragment buffer full, dropping");
                self.overflow_drops += 1;
                return Vec::new();
            }
            self.buffered.insert(
                stage,
                Buffered {
                    payload: payload.to_vec(),
                    flags,
                },
            );
            return Vec::new();
        }

        let mut commits = Vec::new();
        self.apply_fragment(flags, payload, &mut commits);
        self.next_stage += 1;

        while let Some(next) = self.buffered.remove(&self.next_stage) {
            self.apply_fragment(next.flags, &next.payload, &mut commits);
            self.next_stage += 1;
        }

        commits
    }

    fn apply_fragment(&mut self, flags: u8, payload: &[u8], commits: &mut Vec<Commit>) {
        self.in_progress.extend_from_slice(payload);
        if flags & flag::WITH_AFTERPART == 0 {
            commits.push(Commit {
                payload: std::mem::take(&mut self.in_progress),
            });
        }
        if flags & flag::END != 0 {
            self.completed = true;
            if !self.in_progress.is_empty() {
                commits.push(Commit {
                    payload: std::mem::take(&mut self.in_progress),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_fragment_commits_immediately_without_afterpart() {
        let mut flow = Flow::new(3);
        let commits = flow.on_fragment(1, 0, b"hello");
        assert_eq!(commits, vec![Commit { payload: b"hello".to_vec() }]);
    }

    #[test]
    fn beforepart_afterpart_chain_commits_once_assembled() {
        let mut flow = Flow::new(1);
        assert!(flow.on_fragment(1, flag::WITH_AFTERPART, b"hel").is_empty());
        let commits = flow.on_fragment(2, flag::WITH_BEFOREPART, b"lo");
        assert_eq!(commits, vec![Commit { payload: b"hello".to_vec() }]);
    }

    #[test]
    fn out_of_order_fragment_is_buffered_then_cascades() {
        let mut flow = Flow::new(1);
        assert!(flow.on_fragment(3, 0, b"C").is_empty());
        assert!(flow.on_fragment(2, flag::WITH_AFTERPART, b"B").is_empty());
        let commits = flow.on_fragment(1, flag::WITH_AFTERPART, b"A");
        assert_eq!(commits, vec![Commit { payload: b"ABC".to_vec() }]);
    }

    #[test]
    fn end_flag_completes_the_flow() {
        let mut flow = Flow::new(1);
        let commits = flow.on_fragment(1, flag::END, b"done");
        assert!(flow.is_completed());
        assert_eq!(commits, vec![Commit { payload: b"done".to_vec() }]);
        assert!(flow.on_fragment(2, 0, b"ignored").is_empty());
    }

    #[test]
    fn abandonment_advances_stage_and_counts_loss() {
        let mut flow = Flow::new(1);
        let commits = flow.on_fragment(5, flag::ABANDONMENT, b"resumed");
        assert_eq!(flow.lost_fragments(), 4);
        assert_eq!(commits, vec![Commit { payload: b"resumed".to_vec() }]);
    }
}
