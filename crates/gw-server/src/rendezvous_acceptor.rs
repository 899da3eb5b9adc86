//! The UDP rendezvous acceptor (§4.3/§4.4/§4.5): drives
//! [`SessionManager`]'s handshake and sweep from a real socket, and
//! defines the concrete chunk-payload sub-layout the handshake/rendezvous
//! primitives leave to the integration layer.
//!
//! Wire sub-layouts (not specified by `gw_rendezvous` itself, which only
//! ever sees already-extracted tag/cookie/certificate/nonce slices):
//!
//! - `0x30` initiator hello: the raw 16-byte tag, no envelope.
//! - `0x70` responder hello: `tag_echo_len(1) | tag_echo | cookie(64) |
//!   certificate(77)`.
//! - `0x38` initiator initial keying: `cookie_echo(64) | certificate(77) |
//!   initiator_nonce`.
//! - `0x78` responder initial keying: `session_id(4) | responder_nonce`.
//! - `0x10`/`0x11` user data: `varint(flow_id) | varint(stage+1) |
//!   varint(1) | [if stage==0: sig_len(1) | sig] | flags(1) | payload`,
//!   matching [`gw_rendezvous::flow_writer::FlowWriter`]'s own fragment
//!   encoding.
//! - `0x51` acknowledgement: `varint(flow_id) | marker(1, unused) |
//!   varint(stage)`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use gw_rendezvous::chunk::{chunk_type, flags, Chunk, NetworkLayer};
use gw_rendezvous::manager::{run_sweep_loop, SessionManager};
use gw_rendezvous::mitm::MitmSession;
use gw_rendezvous::packet;
use gw_rendezvous::session::SweepAction;
use gw_rendezvous::socket::RendezvousSocket;
use gw_rendezvous::Session;

use crate::error::Error;

/// Drives one UDP socket's worth of rendezvous traffic: the handshake,
/// per-session keepalive, the management sweep, and (when `middle` is
/// configured) a man-in-the-middle upstream leg per client session.
pub struct RendezvousAcceptor {
    socket: RendezvousSocket,
    manager: Arc<SessionManager>,
    start: Instant,
    middle_upstream: Option<SocketAddr>,
    mitm_sessions: DashMap<u32, MitmSession>,
    mitm_by_upstream_peer: DashMap<SocketAddr, u32>,
    mitm_upstream_session_ids: DashMap<u32, u32>,
    mitm_shared_secret: Vec<u8>,
}

impl RendezvousAcceptor {
    /// Bind the rendezvous socket and build the acceptor.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::Io`] from the bind, or [`Error::Rendezvous`]
    /// if the responder identity can't be generated.
    pub async fn bind(addr: SocketAddr, middle_upstream: Option<SocketAddr>) -> Result<Arc<Self>, Error> {
        let socket = RendezvousSocket::bind(addr).await.map_err(gw_rendezvous::Error::from)?;
        let manager = Arc::new(SessionManager::new().map_err(|e| Error::Rendezvous(gw_rendezvous::Error::from(e)))?);
        let mut mitm_shared_secret = vec![0u8; 32];
        getrandom::getrandom(&mut mitm_shared_secret).expect("system randomness unavailable");
        Ok(Arc::new(Self {
            socket,
            manager,
            start: Instant::now(),
            middle_upstream,
            mitm_sessions: DashMap::new(),
            mitm_by_upstream_peer: DashMap::new(),
            mitm_upstream_session_ids: DashMap::new(),
            mitm_shared_secret,
        }))
    }

    /// This acceptor's bound local address.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::Rendezvous`] if the socket handle is invalid.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr().map_err(Error::Rendezvous)?)
    }

    /// Start the management sweep loop at `interval` (spawned
    /// separately so callers can hold the returned handle).
    pub fn spawn_sweep_loop(self: &Arc<Self>, interval: Duration) {
        let acceptor = self.clone();
        let manager = self.manager.clone();
        tokio::spawn(run_sweep_loop(manager, interval, move |id, action, retransmits| {
            let acceptor = acceptor.clone();
            tokio::spawn(async move { acceptor.handle_sweep_action(id, action, retransmits).await });
        }));
    }

    /// Run the receive loop until the socket errors out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rendezvous`] if the socket itself fails (not for
    /// per-packet decode/parse errors, which are logged and dropped).
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        loop {
            let (datagram, peer) = self.socket.recv().await.map_err(Error::Rendezvous)?;
            if let Err(err) = self.handle_datagram(&datagram, peer).await {
                tracing::debug!(%peer, %err, "dropping malformed or unrecognized rendezvous packet");
            }
        }
    }

    fn timestamp(&self) -> u16 {
        (self.start.elapsed().as_millis() / 4) as u16
    }

    fn peek_session_id(datagram: &[u8]) -> Option<u32> {
        if datagram.len() < 12 {
            return None;
        }
        let scrambled = u32::from_be_bytes(datagram[0..4].try_into().ok()?);
        let prefix: [u8; 8] = datagram[4..12].try_into().ok()?;
        Some(packet::scramble(scrambled, &prefix))
    }

    async fn send_envelope(&self, session_id: u32, peer: SocketAddr, key: &[u8; 16], flags_byte: u8, kind: u8, payload: Vec<u8>) -> Result<(), Error> {
        let layer = NetworkLayer {
            flags: flags_byte,
            timestamp: self.timestamp(),
            timestamp_echo: None,
            chunks: vec![Chunk { kind, payload }],
        };
        let packet = packet::encode(session_id, &layer.encode(), key).map_err(gw_rendezvous::Error::from)?;
        self.socket.send_to(&packet, peer).await.map_err(Error::Rendezvous)?;
        Ok(())
    }

    async fn send_handshake(&self, peer: SocketAddr, kind: u8, payload: Vec<u8>) -> Result<(), Error> {
        self.send_envelope(0, peer, gw_crypto::cbc::HANDSHAKE_KEY, flags::HANDSHAKE, kind, payload).await
    }

    async fn send_session(&self, session_id: u32, peer: SocketAddr, key: &[u8; 16], kind: u8, payload: Vec<u8>) -> Result<(), Error> {
        self.send_envelope(session_id, peer, key, flags::SERVER_NO_ECHO, kind, payload).await
    }

    async fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), Error> {
        let Some(session_id) = Self::peek_session_id(datagram) else {
            return Ok(());
        };

        if session_id == 0 {
            let (_, region) = packet::decode(datagram, gw_crypto::cbc::HANDSHAKE_KEY).map_err(gw_rendezvous::Error::from)?;
            let layer = NetworkLayer::parse(&region).map_err(gw_rendezvous::Error::from)?;
            for chunk in &layer.chunks {
                self.handle_handshake_chunk(chunk, peer).await?;
            }
            return Ok(());
        }

        let decode_key = self.manager.get(session_id).map(|session| *session.decode_key());
        if let Some(key) = decode_key {
            let (_, region) = packet::decode(datagram, &key).map_err(gw_rendezvous::Error::from)?;
            if let Some(mut session) = self.manager.get(session_id) {
                session.on_receive();
            }
            let layer = NetworkLayer::parse(&region).map_err(gw_rendezvous::Error::from)?;
            for chunk in &layer.chunks {
                self.handle_session_chunk(session_id, chunk).await?;
            }
            return Ok(());
        }

        if self.middle_upstream.is_some() {
            self.handle_upstream_reply(session_id, datagram, peer).await?;
        }
        Ok(())
    }

    async fn handle_handshake_chunk(&self, chunk: &Chunk, peer: SocketAddr) -> Result<(), Error> {
        match chunk.kind {
            chunk_type::INITIATOR_HELLO => {
                let hello = self.manager.handshake().on_initiator_hello(&chunk.payload);
                let mut payload = Vec::with_capacity(1 + hello.tag_echo.len() + 64 + gw_crypto::CERTIFICATE_LEN);
                payload.push(hello.tag_echo.len() as u8);
                payload.extend_from_slice(&hello.tag_echo);
                payload.extend_from_slice(&hello.cookie);
                payload.extend_from_slice(hello.certificate.as_bytes());
                self.send_handshake(peer, chunk_type::RESPONDER_HELLO, payload).await
            }
            chunk_type::INITIATOR_INITIAL_KEYING => {
                if chunk.payload.len() < 64 + gw_crypto::CERTIFICATE_LEN {
                    return Ok(());
                }
                let mut cookie_echo = [0u8; 64];
                cookie_echo.copy_from_slice(&chunk.payload[..64]);
                let initiator_certificate = &chunk.payload[64..64 + gw_crypto::CERTIFICATE_LEN];
                let initiator_nonce = &chunk.payload[64 + gw_crypto::CERTIFICATE_LEN..];

                let keying = self
                    .manager
                    .handshake()
                    .on_initiator_initial_keying(&cookie_echo, initiator_certificate, initiator_nonce)
                    .map_err(gw_rendezvous::Error::from)?;

                self.manager.insert(Session::new(
                    keying.session_id,
                    peer,
                    keying.encode_key,
                    keying.decode_key,
                    keying.peer_identity,
                ));

                let mut payload = Vec::with_capacity(4 + keying.responder_nonce.len());
                payload.extend_from_slice(&keying.session_id.to_be_bytes());
                payload.extend_from_slice(&keying.responder_nonce);
                self.send_handshake(peer, chunk_type::RESPONDER_INITIAL_KEYING, payload).await?;

                if let Some(upstream) = self.middle_upstream {
                    self.start_mitm_upstream_leg(keying.session_id, upstream).await?;
                }
                Ok(())
            }
            chunk_type::RESPONDER_HELLO => self.handle_upstream_responder_hello(chunk, peer).await,
            chunk_type::RESPONDER_INITIAL_KEYING => self.handle_upstream_responder_keying(chunk, peer).await,
            other => {
                tracing::debug!(kind = other, "ignoring unrecognized handshake-phase chunk");
                Ok(())
            }
        }
    }

    async fn handle_session_chunk(&self, session_id: u32, chunk: &Chunk) -> Result<(), Error> {
        match chunk.kind {
            chunk_type::KEEPALIVE_PROBE => {
                let Some(session) = self.manager.get(session_id) else { return Ok(()) };
                let peer = session.peer_addr();
                let key = *session.encode_key();
                drop(session);
                self.send_session(session_id, peer, &key, chunk_type::KEEPALIVE_RESPONSE, Vec::new()).await
            }
            chunk_type::KEEPALIVE_RESPONSE => Ok(()),
            // In MITM mode every other session chunk is re-terminated
            // against the upstream leg rather than reassembled here.
            _ if self.middle_upstream.is_some() => self.forward_to_upstream(session_id, chunk).await,
            chunk_type::USER_DATA_FULL | chunk_type::USER_DATA_CONTINUATION => self.handle_user_data(session_id, chunk).await,
            chunk_type::ACKNOWLEDGEMENT => {
                self.handle_acknowledgement(session_id, chunk);
                Ok(())
            }
            chunk_type::NEGATIVE_ACK => {
                tracing::debug!(session_id, "peer rejected a flow; relying on the timed retransmit schedule");
                Ok(())
            }
            chunk_type::SESSION_FAILED_BY_PEER => {
                if let Some(mut session) = self.manager.get(session_id) {
                    session.fail();
                }
                Ok(())
            }
            chunk_type::SESSION_DIED => {
                if let Some(mut session) = self.manager.get(session_id) {
                    session.kill();
                }
                Ok(())
            }
            other => {
                tracing::debug!(kind = other, "ignoring session chunk kind with no data-plane handling in this build");
                Ok(())
            }
        }
    }

    /// Decode a `0x10`/`0x11` user-data chunk body into
    /// `(flow_id, stage, flags, payload)`, per the sub-layout documented
    /// at the top of this module.
    fn decode_user_data(payload: &[u8]) -> Option<(u32, u32, u8, &[u8])> {
        let (flow_id, consumed) = gw_rendezvous::varint7::decode(payload)?;
        let rest = &payload[consumed..];
        let (stage_plus1, consumed) = gw_rendezvous::varint7::decode(rest)?;
        let rest = &rest[consumed..];
        let (_, consumed) = gw_rendezvous::varint7::decode(rest)?;
        let mut rest = &rest[consumed..];
        let stage = stage_plus1.saturating_sub(1);
        if stage == 0 {
            let sig_len = usize::from(*rest.first()?);
            if rest.len() < 1 + sig_len {
                return None;
            }
            rest = &rest[1 + sig_len..];
        }
        let flags_byte = *rest.first()?;
        Some((flow_id, stage, flags_byte, &rest[1..]))
    }

    fn encode_acknowledgement(flow_id: u32, stage: u32) -> Vec<u8> {
        let mut out = gw_rendezvous::varint7::encode(flow_id);
        out.push(0);
        out.extend_from_slice(&gw_rendezvous::varint7::encode(stage));
        out
    }

    /// Reassemble an inbound flow fragment through the session's
    /// receive-side [`gw_rendezvous::flow::Flow`] and ack the stage back
    /// to the sender. What a higher layer does with a flow's committed
    /// payloads (a command, a media frame) is not defined at this level.
    async fn handle_user_data(&self, session_id: u32, chunk: &Chunk) -> Result<(), Error> {
        let Some((flow_id, stage, flags_byte, data)) = Self::decode_user_data(&chunk.payload) else {
            return Ok(());
        };
        let Some(session) = self.manager.get(session_id) else { return Ok(()) };
        let peer = session.peer_addr();
        let key = *session.encode_key();
        let commits = session.flow_mut(flow_id).on_fragment(stage, flags_byte, data);
        drop(session);

        for commit in &commits {
            tracing::debug!(session_id, flow_id, bytes = commit.payload.len(), "reassembled rendezvous flow payload");
        }

        let ack = Self::encode_acknowledgement(flow_id, stage);
        self.send_session(session_id, peer, &key, chunk_type::ACKNOWLEDGEMENT, ack).await
    }

    fn handle_acknowledgement(&self, session_id: u32, chunk: &Chunk) {
        let Some((flow_id, stage)) = (|| {
            let (flow_id, consumed) = gw_rendezvous::varint7::decode(&chunk.payload)?;
            let rest = chunk.payload.get(consumed + 1..)?;
            let (stage, _) = gw_rendezvous::varint7::decode(rest)?;
            Some((flow_id, stage))
        })() else {
            return;
        };
        if let Some(mut session) = self.manager.get(session_id) {
            session.acknowledge_flow_writer(flow_id, stage);
        }
    }

    async fn start_mitm_upstream_leg(&self, client_session_id: u32, upstream_addr: SocketAddr) -> Result<(), Error> {
        let mitm = MitmSession::new(client_session_id, upstream_addr, self.mitm_shared_secret.clone())
            .map_err(|e| Error::Rendezvous(gw_rendezvous::Error::from(e)))?;
        let tag = *mitm.upstream_tag();
        self.mitm_by_upstream_peer.insert(upstream_addr, client_session_id);
        self.mitm_sessions.insert(client_session_id, mitm);
        self.send_handshake(upstream_addr, chunk_type::INITIATOR_HELLO, tag.to_vec()).await
    }

    async fn handle_upstream_responder_hello(&self, chunk: &Chunk, peer: SocketAddr) -> Result<(), Error> {
        let Some(client_id) = self.mitm_by_upstream_peer.get(&peer).map(|e| *e) else {
            return Ok(());
        };
        if chunk.payload.is_empty() {
            return Ok(());
        }
        let tag_echo_len = chunk.payload[0] as usize;
        let cookie_start = 1 + tag_echo_len;
        if chunk.payload.len() < cookie_start + 64 {
            return Ok(());
        }
        let cookie = &chunk.payload[cookie_start..cookie_start + 64];

        let Some(mitm) = self.mitm_sessions.get(&client_id) else { return Ok(()) };
        let nonce = mitm.upstream_nonce().to_vec();
        let certificate = *mitm.upstream_certificate().as_bytes();
        drop(mitm);

        let mut payload = Vec::with_capacity(64 + certificate.len() + nonce.len());
        payload.extend_from_slice(cookie);
        payload.extend_from_slice(&certificate);
        payload.extend_from_slice(&nonce);
        self.send_handshake(peer, chunk_type::INITIATOR_INITIAL_KEYING, payload).await
    }

    async fn handle_upstream_responder_keying(&self, chunk: &Chunk, peer: SocketAddr) -> Result<(), Error> {
        let Some(client_id) = self.mitm_by_upstream_peer.get(&peer).map(|e| *e) else {
            return Ok(());
        };
        if chunk.payload.len() < 4 {
            return Ok(());
        }
        let upstream_session_id = u32::from_be_bytes(chunk.payload[..4].try_into().unwrap());
        let responder_nonce = &chunk.payload[4..];

        if let Some(mut mitm) = self.mitm_sessions.get_mut(&client_id) {
            mitm.on_upstream_keying(upstream_session_id, responder_nonce)
                .map_err(|e| Error::Rendezvous(gw_rendezvous::Error::from(e)))?;
        }
        self.mitm_upstream_session_ids.insert(upstream_session_id, client_id);
        Ok(())
    }

    async fn forward_to_upstream(&self, client_id: u32, chunk: &Chunk) -> Result<(), Error> {
        let Some(mitm) = self.mitm_sessions.get(&client_id) else { return Ok(()) };
        let Some(upstream_id) = mitm.upstream_session_id() else { return Ok(()) };
        let Some((encode_key, _)) = mitm.upstream_keys() else { return Ok(()) };
        let upstream_addr = mitm.upstream_addr();
        drop(mitm);
        self.send_session(upstream_id, upstream_addr, &encode_key, chunk.kind, chunk.payload.clone()).await
    }

    async fn handle_upstream_reply(&self, upstream_session_id: u32, datagram: &[u8], _peer: SocketAddr) -> Result<(), Error> {
        let Some(client_id) = self.mitm_upstream_session_ids.get(&upstream_session_id).map(|e| *e) else {
            return Ok(());
        };
        let Some(mitm) = self.mitm_sessions.get(&client_id) else { return Ok(()) };
        let Some((_, decode_key)) = mitm.upstream_keys() else { return Ok(()) };
        drop(mitm);

        let (_, region) = packet::decode(datagram, &decode_key).map_err(gw_rendezvous::Error::from)?;
        let layer = NetworkLayer::parse(&region).map_err(gw_rendezvous::Error::from)?;

        let Some(client_session) = self.manager.get(client_id) else { return Ok(()) };
        let client_peer = client_session.peer_addr();
        let client_encode_key = *client_session.encode_key();
        drop(client_session);

        for chunk in &layer.chunks {
            if matches!(chunk.kind, chunk_type::KEEPALIVE_PROBE | chunk_type::KEEPALIVE_RESPONSE) {
                continue;
            }
            self.send_session(client_id, client_peer, &client_encode_key, chunk.kind, chunk.payload.clone()).await?;
        }
        Ok(())
    }

    async fn handle_sweep_action(&self, id: u32, action: SweepAction, retransmits: Vec<(u8, Vec<u8>)>) {
        match action {
            SweepAction::SendKeepalive => {
                if let Some(session) = self.manager.get(id) {
                    let peer = session.peer_addr();
                    let key = *session.encode_key();
                    drop(session);
                    let _ = self.send_session(id, peer, &key, chunk_type::KEEPALIVE_PROBE, Vec::new()).await;
                }
            }
            SweepAction::EmitSessionFailed => {
                if let Some(session) = self.manager.get(id) {
                    let peer = session.peer_addr();
                    let key = *session.encode_key();
                    drop(session);
                    let _ = self.send_session(id, peer, &key, chunk_type::SESSION_FAILED_BY_PEER, Vec::new()).await;
                }
            }
            SweepAction::Unregister => {
                self.mitm_sessions.remove(&id);
            }
            SweepAction::Fail(_) | SweepAction::None => {}
        }

        if !retransmits.is_empty() {
            if let Some(session) = self.manager.get(id) {
                let peer = session.peer_addr();
                let key = *session.encode_key();
                drop(session);
                for (kind, body) in retransmits {
                    let _ = self.send_session(id, peer, &key, kind, body).await;
                }
            }
        }
    }
}
