//! A concrete [`RtpTransport`] over a pair of real UDP sockets (§6.3, §4.7).

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::Error;
use crate::rtp_transport::{RtpPacket, RtpTransport};

const RTP_VERSION: u8 = 2;
const HEADER_LEN: usize = 12;

fn random_ssrc() -> u32 {
    let mut bytes = [0u8; 4];
    getrandom::getrandom(&mut bytes).expect("system randomness unavailable");
    u32::from_be_bytes(bytes)
}

/// Bind a media/control UDP socket pair, trying successive even ports in
/// `port_range` up to `max_retries` times (§6.3 "media's port chosen even
/// from a configurable range with configurable retries").
///
/// # Errors
///
/// Returns [`Error::PortExhausted`] if every attempt fails, or
/// [`Error::Io`] for a non-address-in-use bind failure.
pub async fn open(bind_ip: IpAddr, port_range: RangeInclusive<u16>, max_retries: u32) -> Result<UdpRtpTransport, Error> {
    let mut candidate = *port_range.start() & !1;
    let end = *port_range.end();

    for attempt in 0..max_retries.max(1) {
        if candidate > end.saturating_sub(1) {
            break;
        }
        match try_bind_pair(bind_ip, candidate).await {
            Ok((media, control)) => {
                return Ok(UdpRtpTransport {
                    media,
                    control,
                    remote: Mutex::new(None),
                    ssrc: random_ssrc(),
                    sequence: AtomicU32::new(0),
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port = candidate, attempt, "rtp port in use, retrying");
                candidate = candidate.saturating_add(2);
            }
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Err(Error::PortExhausted(max_retries))
}

async fn try_bind_pair(bind_ip: IpAddr, media_port: u16) -> std::io::Result<(UdpSocket, UdpSocket)> {
    let media = UdpSocket::bind(SocketAddr::new(bind_ip, media_port)).await?;
    let control = UdpSocket::bind(SocketAddr::new(bind_ip, media_port + 1)).await?;
    Ok((media, control))
}

/// The real UDP-backed [`RtpTransport`]: constructs a minimal 12-byte RTP
/// header per send and strips it per receive. The control socket is held
/// open (for RTCP-style keepalive/quality feedback) but this bridge
/// doesn't interpret its contents (§4.7 Non-goals).
pub struct UdpRtpTransport {
    media: UdpSocket,
    #[allow(dead_code)]
    control: UdpSocket,
    remote: Mutex<Option<SocketAddr>>,
    ssrc: u32,
    sequence: AtomicU32,
}

impl UdpRtpTransport {
    fn encode_header(&self, timestamp: u32, marker: bool, format: u8) -> [u8; HEADER_LEN] {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) as u16;
        let mut header = [0u8; HEADER_LEN];
        header[0] = RTP_VERSION << 6;
        header[1] = (u8::from(marker) << 7) | (format & 0x7f);
        header[2..4].copy_from_slice(&sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}

#[async_trait]
impl RtpTransport for UdpRtpTransport {
    fn local_media_port(&self) -> u16 {
        self.media.local_addr().map(|a| a.port()).unwrap_or_default()
    }

    fn local_control_port(&self) -> u16 {
        self.local_media_port() + 1
    }

    async fn connect(&self, remote_media: SocketAddr) -> Result<(), Error> {
        self.media.connect(remote_media).await?;
        *self.remote.lock().expect("remote mutex poisoned") = Some(remote_media);
        Ok(())
    }

    async fn send(&self, payload: &[u8], timestamp: u32, marker: bool, format: u8) -> Result<(), Error> {
        let header = self.encode_header(timestamp, marker, format);
        let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(payload);
        self.media.send(&packet).await?;
        Ok(())
    }

    async fn recv(&self) -> Option<RtpPacket> {
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, remote) = self.media.recv_from(&mut buf).await.ok()?;
            if len < HEADER_LEN {
                continue;
            }
            let marker = buf[1] & 0x80 != 0;
            let format = buf[1] & 0x7f;
            let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            return Some(RtpPacket {
                payload: buf[HEADER_LEN..len].to_vec(),
                remote,
                format,
                timestamp,
                marker,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_picks_an_even_media_port_and_adjacent_control_port() {
        let transport = open("127.0.0.1".parse().unwrap(), 30000..=30100, 5).await.unwrap();
        assert_eq!(transport.local_media_port() % 2, 0);
        assert_eq!(transport.local_control_port(), transport.local_media_port() + 1);
    }

    #[tokio::test]
    async fn round_trips_payload_timestamp_and_marker() {
        let a = open("127.0.0.1".parse().unwrap(), 31000..=31100, 5).await.unwrap();
        let b = open("127.0.0.1".parse().unwrap(), 31102..=31200, 5).await.unwrap();
        let a_addr = SocketAddr::new("127.0.0.1".parse().unwrap(), a.local_media_port());
        let b_addr = SocketAddr::new("127.0.0.1".parse().unwrap(), b.local_media_port());
        a.connect(b_addr).await.unwrap();
        b.connect(a_addr).await.unwrap();

        a.send(&[1, 2, 3], 4000, true, 8).await.unwrap();
        let packet = b.recv().await.unwrap();
        assert_eq!(packet.payload, vec![1, 2, 3]);
        assert_eq!(packet.timestamp, 4000);
        assert!(packet.marker);
        assert_eq!(packet.format, 8);
    }
}
