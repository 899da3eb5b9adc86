//! Session table and the two-second management sweep (§4.4).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::flow_writer::Tick;
use crate::handshake::Handshake;
use crate::session::{Session, SweepAction};

/// The management sweep runs at this cadence (§4.4 "A management sweep
/// runs every two seconds").
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Owns every established [`Session`] plus the handshake engine that
/// creates them, and runs the periodic management sweep.
pub struct SessionManager {
    handshake: Handshake,
    sessions: DashMap<u32, Session>,
}

impl SessionManager {
    /// Build a manager with a fresh responder identity.
    ///
    /// # Errors
    ///
    /// Propagates [`gw_crypto::CryptoError`] if certificate generation
    /// fails.
    pub fn new() -> Result<Self, gw_crypto::CryptoError> {
        Ok(Self {
            handshake: Handshake::new()?,
            sessions: DashMap::new(),
        })
    }

    /// The handshake engine, for driving the responder state machine from
    /// the socket read loop.
    #[must_use]
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Register a newly established session under its local id.
    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.id(), session);
    }

    /// Look up a session by its local id, for use by the packet read
    /// loop.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<dashmap::mapref::one::RefMut<'_, u32, Session>> {
        self.sessions.get_mut(&id)
    }

    /// Number of sessions currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run one sweep: evict expired cookies, and drive each session's
    /// idle/keepalive/failing state machine. Returns, per session, the
    /// action the caller must carry out (send a keep-alive, emit a
    /// session-failed chunk, or unregister a dead session) plus any
    /// `(chunk kind, body)` flow-writer fragments due for retransmission.
    pub fn sweep(&self) -> Vec<(u32, SweepAction, Vec<(u8, Vec<u8>)>)> {
        self.handshake.cookies().sweep(None);

        let mut actions = Vec::new();
        let mut dead = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            let id = *entry.key();
            let session = entry.value_mut();
            let action = session.sweep();
            if action == SweepAction::Unregister {
                dead.push(id);
            }

            let mut retransmits = Vec::new();
            let mut fatal = false;
            for writer in session.flow_writers_mut() {
                match writer.tick() {
                    Tick::Fatal => fatal = true,
                    Tick::Retransmit(fragments) => retransmits.extend(fragments),
                    Tick::Idle => {}
                }
            }
            if fatal {
                session.fail();
            }

            actions.push((id, action, retransmits));
        }

        for id in dead {
            self.sessions.remove(&id);
        }

        actions
    }
}

/// Run [`SessionManager::sweep`] on `interval` (§4.4 default [`SWEEP_INTERVAL`],
/// overridable by a deployment's own management-frequency setting) until
/// the manager is dropped, invoking `on_action` for every action (and any
/// retransmit fragments) a sweep produces.
pub async fn run_sweep_loop(
    manager: Arc<SessionManager>,
    interval: Duration,
    on_action: impl Fn(u32, SweepAction, Vec<(u8, Vec<u8>)>) + Send + Sync + 'static,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for (id, action, retransmits) in manager.sweep() {
            if action != SweepAction::None || !retransmits.is_empty() {
                on_action(id, action, retransmits);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_has_no_sessions() {
        let manager = SessionManager::new().unwrap();
        assert!(manager.is_empty());
        assert!(manager.sweep().is_empty());
    }
}
