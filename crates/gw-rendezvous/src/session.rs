//! An established rendezvous session: per-direction AES keys, the flow
//! tables riding on top, and the keepalive bookkeeping the manager sweep
//! (§4.4) drives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;

use crate::flow::Flow;
use crate::flow_writer::FlowWriter;

/// A session is failed once it has gone this long without receiving
/// anything (§4.4).
pub const IDLE_TIMEOUT_SECS: u64 = 360;
/// A session starts sending keepalive probes once it has gone this long
/// without receiving anything.
pub const KEEPALIVE_THRESHOLD_SECS: u64 = 120;
/// After this many unanswered keepalive probes, the session is failed.
pub const MAX_KEEPALIVE_ATTEMPTS: u32 = 10;
/// A failing session emits `0x0c` this many times before being declared
/// dead, whichever comes first with [`FAILING_TIMEOUT_SECS`].
pub const MAX_FAILING_EMISSIONS: u32 = 10;
/// A failing session transitions to dead after this long regardless of
/// emission count.
pub const FAILING_TIMEOUT_SECS: u64 = 360;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Normal operation.
    Established,
    /// The session has failed and is emitting `0x0c` until it is
    /// unregistered.
    Failing,
    /// Terminal; ready for removal from the session table.
    Dead,
}

/// Call state carried by a peer's [`Session`] (§3, Session attributes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// No call has been offered or accepted on this session yet.
    #[default]
    None,
    /// The peer's call was accepted.
    Accepted,
    /// The peer's call was rejected.
    Rejected,
}

/// One established rendezvous session, keyed by its local (responder)
/// session id.
pub struct Session {
    id: u32,
    peer_addr: SocketAddr,
    encode_key: [u8; 16],
    decode_key: [u8; 16],
    state: SessionState,
    last_receive: Instant,
    last_sent_timestamp_echo: u16,
    keepalive_attempts: u32,
    failing_emissions: u32,
    failing_since: Option<Instant>,
    flows: DashMap<u32, Flow>,
    flow_writers: HashMap<u32, FlowWriter>,
    peer_identity: [u8; 32],
    call_state: CallState,
    private_addresses: Vec<SocketAddr>,
    groups: Vec<[u8; 32]>,
}

impl Session {
    /// Construct a freshly established session. `peer_identity` is the
    /// 32-byte hash of the peer's certificate, computed during keying
    /// (§3, Session.Peer identity).
    #[must_use]
    pub fn new(id: u32, peer_addr: SocketAddr, encode_key: [u8; 16], decode_key: [u8; 16], peer_identity: [u8; 32]) -> Self {
        Self {
            id,
            peer_addr,
            encode_key,
            decode_key,
            state: SessionState::Established,
            last_receive: Instant::now(),
            last_sent_timestamp_echo: 0,
            keepalive_attempts: 0,
            failing_emissions: 0,
            failing_since: None,
            flows: DashMap::new(),
            flow_writers: HashMap::new(),
            peer_identity,
            call_state: CallState::None,
            private_addresses: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// 32-byte hash of the peer's certificate.
    #[must_use]
    pub fn peer_identity(&self) -> [u8; 32] {
        self.peer_identity
    }

    /// This session's current call state.
    #[must_use]
    pub fn call_state(&self) -> CallState {
        self.call_state
    }

    /// Record the outcome of a call offered on this session.
    pub fn set_call_state(&mut self, state: CallState) {
        self.call_state = state;
    }

    /// Private addresses the peer has advertised for direct (NAT-traversal)
    /// contact.
    #[must_use]
    pub fn private_addresses(&self) -> &[SocketAddr] {
        &self.private_addresses
    }

    /// Record a private address the peer advertised.
    pub fn add_private_address(&mut self, addr: SocketAddr) {
        if !self.private_addresses.contains(&addr) {
            self.private_addresses.push(addr);
        }
    }

    /// NetGroup identifiers the peer is subscribed to.
    #[must_use]
    pub fn groups(&self) -> &[[u8; 32]] {
        &self.groups
    }

    /// Record a group the peer subscribed to.
    pub fn add_group(&mut self, group_id: [u8; 32]) {
        if !self.groups.contains(&group_id) {
            self.groups.push(group_id);
        }
    }

    /// This session's local id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The peer's transport address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Key used to encrypt packets sent to the peer.
    #[must_use]
    pub fn encode_key(&self) -> &[u8; 16] {
        &self.encode_key
    }

    /// Key used to decrypt packets received from the peer.
    #[must_use]
    pub fn decode_key(&self) -> &[u8; 16] {
        &self.decode_key
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Record that a packet was just received, resetting the idle and
    /// keepalive timers (§4.4 "the session receive timer is reset upon
    /// any … chunk").
    pub fn on_receive(&mut self) {
        self.last_receive = Instant::now();
        self.keepalive_attempts = 0;
        if self.state == SessionState::Failing {
            self.state = SessionState::Established;
            self.failing_emissions = 0;
            self.failing_since = None;
        }
    }

    /// Remember the timestamp echo value to place on the next outbound
    /// packet.
    pub fn set_last_sent_timestamp_echo(&mut self, echo: u16) {
        self.last_sent_timestamp_echo = echo;
    }

    /// The timestamp echo value to place on the next outbound packet.
    #[must_use]
    pub fn last_sent_timestamp_echo(&self) -> u16 {
        self.last_sent_timestamp_echo
    }

    /// Get or create the receive-side [`Flow`] for `flow_id`.
    pub fn flow_mut(&self, flow_id: u32) -> dashmap::mapref::one::RefMut<'_, u32, Flow> {
        self.flows.entry(flow_id).or_insert_with(|| Flow::new(flow_id))
    }

    /// Get or create the send-side [`FlowWriter`] for `flow_id`.
    pub fn flow_writer_mut(&mut self, flow_id: u32, signature: Vec<u8>) -> &mut FlowWriter {
        self.flow_writers
            .entry(flow_id)
            .or_insert_with(|| FlowWriter::new(flow_id, signature, None))
    }

    /// Every send-side flow writer, for the manager's retransmit sweep.
    pub fn flow_writers_mut(&mut self) -> impl Iterator<Item = &mut FlowWriter> {
        self.flow_writers.values_mut()
    }

    /// Apply an acknowledgement (`0x51`) received from the peer to the
    /// named flow's writer, if one exists.
    pub fn acknowledge_flow_writer(&mut self, flow_id: u32, stage: u32) {
        if let Some(writer) = self.flow_writers.get_mut(&flow_id) {
            writer.acknowledge(stage);
        }
    }

    /// Force this session straight to [`SessionState::Dead`], e.g. on
    /// receiving a `0x4c` session-died notification from the peer.
    pub fn kill(&mut self) {
        self.state = SessionState::Dead;
    }

    /// Apply one management-sweep tick (§4.4). Returns what the caller
    /// should do as a result.
    pub fn sweep(&mut self) -> SweepAction {
        match self.state {
            SessionState::Established => {
                let idle = self.last_receive.elapsed().as_secs();
                if idle >= IDLE_TIMEOUT_SECS {
                    self.enter_failing();
                    return SweepAction::Fail("timeout no client message");
                }
                if idle >= KEEPALIVE_THRESHOLD_SECS {
                    if self.keepalive_attempts >= MAX_KEEPALIVE_ATTEMPTS {
                        self.enter_failing();
                        return SweepAction::Fail("timeout keepalive");
                    }
                    self.keepalive_attempts += 1;
                    return SweepAction::SendKeepalive;
                }
                SweepAction::None
            }
            SessionState::Failing => {
                self.failing_emissions += 1;
                let failing_secs = self.failing_since.map(|t| t.elapsed().as_secs()).unwrap_or_default();
                if self.failing_emissions >= MAX_FAILING_EMISSIONS || failing_secs >= FAILING_TIMEOUT_SECS {
                    self.state = SessionState::Dead;
                    return SweepAction::Unregister;
                }
                SweepAction::EmitSessionFailed
            }
            SessionState::Dead => SweepAction::Unregister,
        }
    }

    fn enter_failing(&mut self) {
        self.state = SessionState::Failing;
        self.failing_emissions = 0;
        self.failing_since = Some(Instant::now());
    }

    /// Force this session into the failing state, e.g. because a
    /// [`FlowWriter`] exhausted its retransmit budget.
    pub fn fail(&mut self) {
        if self.state == SessionState::Established {
            self.enter_failing();
        }
    }
}

/// What a [`Session::sweep`] call asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Nothing to do this tick.
    None,
    /// Send a `0x01` keep-alive probe.
    SendKeepalive,
    /// The session just failed; this is the first failing-state tick.
    Fail(&'static str),
    /// Emit another `0x0c` session-failed chunk.
    EmitSessionFailed,
    /// The session is dead; remove it from the session table.
    Unregister,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:1935".parse().unwrap()
    }

    #[test]
    fn fresh_session_sweeps_to_none() {
        let mut session = Session::new(1, addr(), [0; 16], [0; 16], [0; 32]);
        assert_eq!(session.sweep(), SweepAction::None);
    }

    #[test]
    fn receive_resets_out_of_failing_state() {
        let mut session = Session::new(1, addr(), [0; 16], [0; 16], [0; 32]);
        session.fail();
        assert_eq!(session.state(), SessionState::Failing);
        session.on_receive();
        assert_eq!(session.state(), SessionState::Established);
    }
}
