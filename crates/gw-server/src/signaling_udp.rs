//! A concrete [`SignalingTransport`] over a UDP socket (§6.3 "a signaling
//! stack providing bind, unbind, createRequest, sendRequest, sendResponse,
//! and a recv iterator"), using a small JSON envelope rather than claiming
//! wire parity with the SIP text format `original_source/siprtmp.py` rode
//! on top of.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, Mutex};

use gw_signaling::{Error, Request, SignalingTransport, Transaction};

const MAX_DATAGRAM_LEN: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
enum Envelope {
    Request { txn_id: u64, method: String, to_uri: String, body: Option<String> },
    Provisional { txn_id: u64, code: u16 },
    Final { txn_id: u64, code: u16, reason: String, body: Option<String> },
}

/// Resolve the host:port portion of an address-of-record or request URI,
/// tolerating an optional `sip:user@` prefix.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the remainder doesn't resolve to a
/// socket address.
fn resolve_uri(uri: &str) -> Result<SocketAddr, Error> {
    let stripped = uri.strip_prefix("sip:").unwrap_or(uri);
    let host_port = stripped.rsplit_once('@').map_or(stripped, |(_, rest)| rest);
    host_port
        .parse()
        .or_else(|_| {
            use std::net::ToSocketAddrs as _;
            host_port
                .to_socket_addrs()
                .ok()
                .and_then(|mut it| it.next())
                .ok_or(())
        })
        .map_err(|_| Error::Transport(format!("cannot resolve signaling peer from uri: {uri}")))
}

/// A UDP-backed [`SignalingTransport`]: every request carries a
/// transaction id so provisional/final responses route back to the
/// `send_request` caller's channel; unmatched envelopes are treated as
/// fresh incoming transactions.
pub struct UdpSignalingTransport {
    socket: Arc<UdpSocket>,
    pending: DashMap<u64, mpsc::Sender<Transaction>>,
    incoming_txn_by_peer: DashMap<SocketAddr, u64>,
    bound_peers: DashMap<String, SocketAddr>,
    next_txn: AtomicU64,
    incoming_rx: Mutex<mpsc::Receiver<Transaction>>,
}

impl UdpSignalingTransport {
    /// Bind a UDP socket at `local_addr` and start the background receive
    /// loop.
    ///
    /// # Errors
    ///
    /// Propagates [`std::io::Error`] from the underlying bind.
    pub async fn bind(local_addr: impl ToSocketAddrs) -> std::io::Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(local_addr).await?);
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let transport = Arc::new(Self {
            socket: socket.clone(),
            pending: DashMap::new(),
            incoming_txn_by_peer: DashMap::new(),
            bound_peers: DashMap::new(),
            next_txn: AtomicU64::new(1),
            incoming_rx: Mutex::new(incoming_rx),
        });
        tokio::spawn(Self::run_receive_loop(transport.clone(), incoming_tx));
        Ok(transport)
    }

    /// This transport's bound local address.
    ///
    /// # Errors
    ///
    /// Propagates [`std::io::Error`] if the socket handle is invalid.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn run_receive_loop(transport: Arc<Self>, incoming_tx: mpsc::Sender<Transaction>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, peer) = match transport.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(%err, "signaling socket recv failed");
                    continue;
                }
            };
            let Ok(envelope) = serde_json::from_slice::<Envelope>(&buf[..len]) else {
                tracing::debug!(%peer, "dropping malformed signaling envelope");
                continue;
            };
            transport.dispatch(peer, envelope, &incoming_tx).await;
        }
    }

    async fn dispatch(&self, peer: SocketAddr, envelope: Envelope, incoming_tx: &mpsc::Sender<Transaction>) {
        match envelope {
            Envelope::Provisional { txn_id, code } => {
                if let Some(sender) = self.pending.get(&txn_id) {
                    let _ = sender.send(Transaction::Provisional { code }).await;
                }
            }
            Envelope::Final { txn_id, code, reason, body } => {
                if let Some((_, sender)) = self.pending.remove(&txn_id) {
                    let _ = sender.send(Transaction::Final { code, reason, body }).await;
                }
            }
            Envelope::Request { txn_id, method, to_uri: _, body } => {
                self.incoming_txn_by_peer.insert(peer, txn_id);
                let _ = incoming_tx
                    .send(Transaction::Incoming { method, from_uri: peer.to_string(), body })
                    .await;
            }
        }
    }

    async fn send_envelope(&self, peer: SocketAddr, envelope: &Envelope) -> Result<(), Error> {
        let bytes = serde_json::to_vec(envelope).map_err(|e| Error::Transport(e.to_string()))?;
        self.socket.send_to(&bytes, peer).await.map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SignalingTransport for UdpSignalingTransport {
    async fn bind(&self, address: &str, password: &str, expiry: u32) -> Result<u32, Error> {
        let peer = resolve_uri(address)?;
        let txn_id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel(4);
        self.pending.insert(txn_id, tx);

        let body = if password.is_empty() { None } else { Some(password.to_string()) };
        self.send_envelope(
            peer,
            &Envelope::Request { txn_id, method: "REGISTER".to_string(), to_uri: address.to_string(), body },
        )
        .await?;

        match rx.recv().await {
            Some(Transaction::Final { code, .. }) if (200..300).contains(&code) => {
                self.bound_peers.insert(address.to_string(), peer);
                Ok(expiry)
            }
            Some(Transaction::Final { reason, .. }) => Err(Error::RegistrationRejected(reason)),
            _ => Err(Error::Transport("registration transaction closed without a final response".to_string())),
        }
    }

    async fn unbind(&self, address: &str) {
        self.bound_peers.remove(address);
    }

    async fn send_request(&self, request: Request) -> Result<mpsc::Receiver<Transaction>, Error> {
        let peer = resolve_uri(&request.to_uri)?;
        let txn_id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(8);
        self.pending.insert(txn_id, tx);
        self.send_envelope(
            peer,
            &Envelope::Request { txn_id, method: request.method, to_uri: request.to_uri, body: request.body },
        )
        .await?;
        Ok(rx)
    }

    async fn send_response(&self, to_uri: &str, _method: &str, code: u16, reason: &str, body: Option<String>) -> Result<(), Error> {
        let peer = resolve_uri(to_uri)?;
        let Some((_, txn_id)) = self.incoming_txn_by_peer.remove(&peer) else {
            return Err(Error::Transport(format!("no pending incoming transaction from {to_uri}")));
        };
        self.send_envelope(peer, &Envelope::Final { txn_id, code, reason: reason.to_string(), body }).await
    }

    async fn recv(&self) -> Option<Transaction> {
        self.incoming_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uri_strips_sip_scheme_and_userinfo() {
        let addr = resolve_uri("sip:alice@127.0.0.1:5060").unwrap();
        assert_eq!(addr.port(), 5060);
    }

    #[test]
    fn resolve_uri_rejects_unresolvable_host() {
        assert!(resolve_uri("sip:alice@not a valid host").is_err());
    }

    #[tokio::test]
    async fn request_and_response_round_trip_over_loopback() {
        let a = UdpSignalingTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSignalingTransport::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();

        let request = Request { method: "INVITE".into(), to_uri: b_addr.to_string(), body: Some("wideband".into()) };
        let mut rx = a.send_request(request).await.unwrap();

        let incoming = b.recv().await.unwrap();
        let Transaction::Incoming { method, from_uri, body } = incoming else { panic!("expected an incoming transaction") };
        assert_eq!(method, "INVITE");
        assert_eq!(body.as_deref(), Some("wideband"));

        b.send_response(&from_uri, "INVITE", 200, "OK", Some("pcmu".into())).await.unwrap();

        match rx.recv().await {
            Some(Transaction::Final { code, body, .. }) => {
                assert_eq!(code, 200);
                assert_eq!(body.as_deref(), Some("pcmu"));
            }
            other => panic!("expected a final transaction, got {other:?}"),
        }
    }
}
