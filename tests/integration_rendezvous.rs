//! Scenarios E3 and E6: the UDP rendezvous handshake and session wire
//! protocol driven end to end over real loopback sockets against a live
//! `RendezvousAcceptor`.
//!
//! The 120-second keepalive threshold and the cookie's 120-second
//! lifetime are exercised without a live wait at the unit level, in
//! `gw-rendezvous`'s own `session` and `cookie` test modules (driving
//! `Session::sweep`/`CookieTable::sweep` directly against their real
//! state machines). These integration tests instead exercise the parts
//! that only a real socket proves: the wire dispatch of a keepalive
//! probe/response pair over an established encrypted session, and that a
//! flood of initiator-hellos each gets its own usable, non-colliding
//! cookie rather than stepping on another attempt's handshake.

use std::collections::HashSet;
use std::net::SocketAddr;

use gatewayd_integration_tests::fixtures::rendezvous::RendezvousTestClient;
use gw_rendezvous::chunk::{chunk_type, flags, Chunk, NetworkLayer};
use gw_rendezvous::handshake::InitiatorHandshake;
use gw_rendezvous::packet;
use gw_server::rendezvous_acceptor::RendezvousAcceptor;
use tokio::net::UdpSocket;

async fn start_rendezvous_acceptor() -> SocketAddr {
    let acceptor = RendezvousAcceptor::bind("127.0.0.1:0".parse().unwrap(), None).await.unwrap();
    let addr = acceptor.local_addr().unwrap();
    tokio::spawn(acceptor.clone().run());
    addr
}

#[tokio::test]
async fn scenario_e3_keepalive_probe_round_trip() {
    let addr = start_rendezvous_acceptor().await;
    let client = RendezvousTestClient::handshake(addr).await;

    client.send_chunk(chunk_type::KEEPALIVE_PROBE, Vec::new()).await;
    let chunks = client.recv_chunks().await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, chunk_type::KEEPALIVE_RESPONSE);
    assert!(chunks[0].payload.is_empty());
}

#[tokio::test]
async fn scenario_e6_cookie_flood_each_hello_gets_a_distinct_usable_cookie() {
    let addr = start_rendezvous_acceptor().await;
    const FLOOD: usize = 64;

    let mut cookies = HashSet::new();
    for _ in 0..FLOOD {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();

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
            .expect("acceptor never answered an initiator-hello");

        let tag_echo_len = responder_hello.payload[0] as usize;
        assert_eq!(&responder_hello.payload[1..1 + tag_echo_len], initiator.tag().as_slice());
        let cookie_start = 1 + tag_echo_len;
        let cookie: [u8; 64] = responder_hello.payload[cookie_start..cookie_start + 64].try_into().unwrap();

        assert!(cookies.insert(cookie), "two distinct initiator-hellos were issued the same cookie");

        // The flood never sends the follow-up initiator-initial-keying, so
        // none of these attempts ever completes a session - mirroring a
        // SYN-flood that abandons every handshake after the first round trip.
    }

    assert_eq!(cookies.len(), FLOOD);
}

#[tokio::test]
async fn handshake_over_real_socket_yields_a_working_encrypted_session() {
    let addr = start_rendezvous_acceptor().await;
    let client_a = RendezvousTestClient::handshake(addr).await;
    let client_b = RendezvousTestClient::handshake(addr).await;

    assert_ne!(client_a.session_id(), client_b.session_id());

    client_a.send_chunk(chunk_type::KEEPALIVE_PROBE, Vec::new()).await;
    assert_eq!(client_a.recv_chunks().await[0].kind, chunk_type::KEEPALIVE_RESPONSE);

    client_b.send_chunk(chunk_type::KEEPALIVE_PROBE, Vec::new()).await;
    assert_eq!(client_b.recv_chunks().await[0].kind, chunk_type::KEEPALIVE_RESPONSE);
}
