//! A minimal UDP client driving the real four-way rendezvous handshake
//! and the in-session envelope against a live `RendezvousAcceptor`.

use std::net::SocketAddr;

use gw_rendezvous::chunk::{chunk_type, flags, Chunk, NetworkLayer};
use gw_rendezvous::handshake::InitiatorHandshake;
use gw_rendezvous::packet;
use tokio::net::UdpSocket;

/// One end of an established rendezvous session: the session id and the
/// two direction keys an initiator derives once the handshake completes.
pub struct RendezvousTestClient {
    socket: UdpSocket,
    session_id: u32,
    encode_key: [u8; 16],
    decode_key: [u8; 16],
}

impl RendezvousTestClient {
    /// Bind an ephemeral local socket and run the full handshake against
    /// `peer`, following the same `0x30 -> 0x70 -> 0x38 -> 0x78` exchange
    /// `RendezvousAcceptor` drives server-side.
    pub async fn handshake(peer: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer).await.unwrap();

        let initiator = InitiatorHandshake::new().unwrap();

        let hello = NetworkLayer {
            flags: flags::HANDSHAKE,
            timestamp: 0,
            timestamp_echo: None,
            chunks: vec![Chunk { kind: chunk_type::INITIATOR_HELLO, payload: initiator.tag().to_vec() }],
        };
        let packet = packet::encode(0, &hello.encode(), gw_crypto::cbc::HANDSHAKE_KEY).unwrap();
        socket.send(&packet).await.unwrap();

        let mut buf = vec![0u8; 2048];
        let n = socket.recv(&mut buf).await.unwrap();
        let (_, region) = packet::decode(&buf[..n], gw_crypto::cbc::HANDSHAKE_KEY).unwrap();
        let layer = NetworkLayer::parse(&region).unwrap();
        let responder_hello = layer
            .chunks
            .iter()
            .find(|c| c.kind == chunk_type::RESPONDER_HELLO)
            .expect("peer never sent a responder-hello");

        let tag_echo_len = responder_hello.payload[0] as usize;
        let cookie_start = 1 + tag_echo_len;
        let cookie: [u8; 64] = responder_hello.payload[cookie_start..cookie_start + 64].try_into().unwrap();

        let mut keying_payload = Vec::with_capacity(64 + initiator.nonce().len());
        keying_payload.extend_from_slice(&cookie);
        keying_payload.extend_from_slice(initiator.nonce());
        let keying = NetworkLayer {
            flags: flags::HANDSHAKE,
            timestamp: 1,
            timestamp_echo: None,
            chunks: vec![Chunk { kind: chunk_type::INITIATOR_INITIAL_KEYING, payload: keying_payload }],
        };
        let packet = packet::encode(0, &keying.encode(), gw_crypto::cbc::HANDSHAKE_KEY).unwrap();
        socket.send(&packet).await.unwrap();

        let n = socket.recv(&mut buf).await.unwrap();
        let (_, region) = packet::decode(&buf[..n], gw_crypto::cbc::HANDSHAKE_KEY).unwrap();
        let layer = NetworkLayer::parse(&region).unwrap();
        let responder_keying = layer
            .chunks
            .iter()
            .find(|c| c.kind == chunk_type::RESPONDER_INITIAL_KEYING)
            .expect("peer never sent a responder-initial-keying");

        let session_id = u32::from_be_bytes(responder_keying.payload[..4].try_into().unwrap());
        let responder_nonce = &responder_keying.payload[4..];
        let (_, encode_key, decode_key) = initiator.on_responder_keying(responder_nonce).unwrap();

        Self { socket, session_id, encode_key, decode_key }
    }

    /// This session's id, as picked by the responder.
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Send one in-session chunk, encrypted under this session's encode key.
    pub async fn send_chunk(&self, kind: u8, payload: Vec<u8>) {
        let layer = NetworkLayer {
            flags: flags::CLIENT_NO_ECHO_LOW,
            timestamp: 0,
            timestamp_echo: None,
            chunks: vec![Chunk { kind, payload }],
        };
        let packet = packet::encode(self.session_id, &layer.encode(), &self.encode_key).unwrap();
        self.socket.send(&packet).await.unwrap();
    }

    /// Receive and decrypt the next in-session packet, returning its chunks.
    pub async fn recv_chunks(&self) -> Vec<Chunk> {
        let mut buf = vec![0u8; 2048];
        let n = self.socket.recv(&mut buf).await.unwrap();
        let (_, region) = packet::decode(&buf[..n], &self.decode_key).unwrap();
        NetworkLayer::parse(&region).unwrap().chunks
    }
}
