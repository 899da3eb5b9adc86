//! Async UDP socket wrapper with basic traffic counters.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::Error;

const MAX_DATAGRAM_LEN: usize = 4096;

/// A shared, cheaply-cloned UDP socket with packet/byte counters, used by
/// both the main rendezvous listener and each MITM session's upstream
/// leg.
#[derive(Clone)]
pub struct RendezvousSocket {
    inner: Arc<UdpSocket>,
    packets_received: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
}

impl RendezvousSocket {
    /// Bind a new UDP socket at `addr`, sized for sustained media
    /// traffic rather than the OS default.
    ///
    /// # Errors
    ///
    /// Propagates [`std::io::Error`] from the underlying bind.
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let raw = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
        raw.set_recv_buffer_size(2 * 1024 * 1024)?;
        raw.set_send_buffer_size(2 * 1024 * 1024)?;
        raw.bind(&addr.into())?;
        raw.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(raw.into())?;
        Ok(Self {
            inner: Arc::new(socket),
            packets_received: Arc::new(AtomicU64::new(0)),
            packets_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
        })
    }

    /// This socket's local address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.local_addr()?)
    }

    /// Receive one datagram, returning its bytes and the sender's
    /// address.
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, peer) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(len);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        Ok((buf, peer))
    }

    /// Send one datagram to `peer`.
    pub async fn send_to(&self, data: &[u8], peer: SocketAddr) -> Result<(), Error> {
        self.inner.send_to(data, peer).await?;
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of this socket's traffic counters:
    /// `(packets_received, packets_sent, bytes_received, bytes_sent)`.
    #[must_use]
    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (
            self.packets_received.load(Ordering::Relaxed),
            self.packets_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
        )
    }
}
