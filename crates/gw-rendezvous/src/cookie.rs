//! Cookie-based anti-flood table (§4.3 "Cookie discipline").

use std::time::{Duration, Instant};

use dashmap::DashMap;

use gw_crypto::random;

/// A cookie is obsolete once it has lived this long and is evicted on the
/// next management sweep.
pub const COOKIE_LIFETIME: Duration = Duration::from_secs(120);

/// Raw cookie bytes exchanged in initiator/responder hello chunks.
pub type CookieId = [u8; 64];

struct CookieEntry {
    created_at: Instant,
    pending_session_id: Option<u32>,
}

/// Tracks outstanding cookies issued during the handshake's cookie-pending
/// stage.
#[derive(Default)]
pub struct CookieTable {
    entries: DashMap<CookieId, CookieEntry>,
}

impl CookieTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and register a fresh random cookie.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG is unavailable; a rendezvous responder
    /// cannot operate without one.
    #[must_use]
    pub fn issue(&self) -> CookieId {
        let mut cookie = [0u8; 64];
        random::fill_random(&mut cookie).expect("OS CSPRNG unavailable");
        self.entries.insert(
            cookie,
            CookieEntry {
                created_at: Instant::now(),
                pending_session_id: None,
            },
        );
        cookie
    }

    /// Record the session id a cookie's handshake is provisionally
    /// establishing, so completion can evict it by session id too.
    pub fn bind_pending_session(&self, cookie: &CookieId, session_id: u32) {
        if let Some(mut entry) = self.entries.get_mut(cookie) {
            entry.pending_session_id = Some(session_id);
        }
    }

    /// True if `cookie` is registered and not yet expired.
    #[must_use]
    pub fn is_valid(&self, cookie: &CookieId) -> bool {
        self.entries
            .get(cookie)
            .is_some_and(|entry| entry.created_at.elapsed() < COOKIE_LIFETIME)
    }

    /// Evict every cookie whose pending session id now matches an
    /// established session (handshake completed) or that has outlived
    /// [`COOKIE_LIFETIME`]. Returns the number evicted.
    pub fn sweep(&self, established_session_id: Option<u32>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let expired = entry.created_at.elapsed() >= COOKIE_LIFETIME;
            let completed = established_session_id.is_some() && entry.pending_session_id == established_session_id;
            !(expired || completed)
        });
        before - self.entries.len()
    }

    /// Number of cookies currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no cookies are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
