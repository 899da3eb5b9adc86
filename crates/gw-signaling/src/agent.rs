//! The signaling user agent (§4.6, L8): one per bridge-application
//! streaming connection, bound to a private signaling address for the
//! lifetime of that connection.

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use gw_media::{negotiate, offer_for, rtp_udp, AudioLabel, Format, MediaBridge, Medium, Negotiated, RtpTransport, VideoLabel};

use crate::callbacks::StreamingClient;
use crate::error::Error;
use crate::transport::{Request, SignalingTransport, Transaction};

/// Default invitation response timeout (§5: "default 10 seconds").
pub const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(10);

/// RFC 2833 event duration embedded in the touch-tone payload, in
/// timestamp units at the negotiated clock rate (100ms at 8000Hz).
const DTMF_EVENT_DURATION: u16 = 800;

const DEFAULT_REJECT_REASON: &str = "603 Decline";

/// Where a call's per-call RTP media/control socket pair is opened
/// (§6.3 "media's port chosen even from a configurable range with
/// configurable retries").
#[derive(Debug, Clone)]
pub struct RtpConfig {
    /// Bind address for the media/control sockets.
    pub bind_ip: IpAddr,
    /// Candidate port range the media socket is chosen from.
    pub port_range: RangeInclusive<u16>,
    /// Maximum bind attempts before giving up.
    pub max_retries: u32,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self { bind_ip: IpAddr::from([0, 0, 0, 0]), port_range: 16384..=32768, max_retries: 32 }
    }
}

/// Which side originated the in-flight or active call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outgoing,
    Incoming,
}

/// The user agent's current call state.
enum CallState {
    Idle,
    /// An outgoing invite is in flight, or an incoming invite is queued
    /// awaiting `accept`/`reject`.
    Pending {
        direction: Direction,
        peer_uri: String,
        offer: Vec<Format>,
        peer_media_addr: Option<SocketAddr>,
    },
    /// A call is connected.
    Active {
        peer_uri: String,
        bridge: MediaBridge,
        on_hold: bool,
        transport: Option<Arc<dyn RtpTransport>>,
    },
}

/// A signaling user agent: register/invite/accept/reject/bye/hold/DTMF
/// (§4.6), bridging a streaming connection's call-control commands to a
/// SIP-style signaling transport and the media bridge.
pub struct UserAgent {
    transport: Arc<dyn SignalingTransport>,
    streaming_client: Arc<dyn StreamingClient>,
    codec_module: Option<Arc<dyn gw_media::vbr::AudioCodecModule>>,
    rtp_config: RtpConfig,
    bound_address: Mutex<Option<String>>,
    call: Mutex<CallState>,
    invite_timeout: Duration,
    /// Bumped every time a call leaves `Active`, so the background RTP
    /// receive loop spawned by `activate` for an earlier call knows to
    /// stop even though its transport `Arc` may still be alive elsewhere.
    call_generation: AtomicU64,
}

impl UserAgent {
    /// Build a fresh, unregistered user agent.
    #[must_use]
    pub fn new(transport: Arc<dyn SignalingTransport>, streaming_client: Arc<dyn StreamingClient>) -> Self {
        Self {
            transport,
            streaming_client,
            codec_module: None,
            rtp_config: RtpConfig::default(),
            bound_address: Mutex::new(None),
            call: Mutex::new(CallState::Idle),
            invite_timeout: DEFAULT_INVITE_TIMEOUT,
            call_generation: AtomicU64::new(0),
        }
    }

    /// Attach a real audio codec module, enabling companded transcoding
    /// (§4.7).
    #[must_use]
    pub fn with_codec_module(mut self, module: Arc<dyn gw_media::vbr::AudioCodecModule>) -> Self {
        self.codec_module = Some(module);
        self
    }

    /// Override where this agent's calls open their RTP media sockets.
    #[must_use]
    pub fn with_rtp_config(mut self, rtp_config: RtpConfig) -> Self {
        self.rtp_config = rtp_config;
        self
    }

    /// Override the invitation response timeout.
    #[must_use]
    pub fn with_invite_timeout(mut self, timeout: Duration) -> Self {
        self.invite_timeout = timeout;
        self
    }

    /// register(displayName, authName, password, rate) — bind a
    /// signaling address, authenticating if a password is supplied, and
    /// keep the binding refreshed before its expiry.
    ///
    /// `self` must be held behind an `Arc` so the refresh task can hold
    /// a weak reference across the binding's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationRejected`] if the signaling peer
    /// refuses the binding.
    #[instrument(skip(self, password))]
    pub async fn register(self: &Arc<Self>, address: &str, password: &str, expiry: u32) -> Result<(), Error> {
        if password.is_empty() {
            debug!("binding without authentication");
            *self.bound_address.lock().await = Some(address.to_string());
            return Ok(());
        }

        let granted_expiry = self.transport.bind(address, password, expiry).await?;
        *self.bound_address.lock().await = Some(address.to_string());

        let weak = Arc::downgrade(self);
        let address = address.to_string();
        tokio::spawn(async move {
            let refresh_interval = Duration::from_secs(u64::from(granted_expiry).saturating_mul(9) / 10).max(Duration::from_secs(1));
            loop {
                tokio::time::sleep(refresh_interval).await;
                let Some(agent) = weak.upgrade() else { break };
                let Some(bound) = agent.bound_address.lock().await.clone() else { break };
                if bound != address {
                    break;
                }
                if let Err(err) = agent.transport.bind(&address, "", granted_expiry).await {
                    warn!(%err, "registration refresh failed");
                }
            }
        });
        Ok(())
    }

    /// unregister() — release the current binding, if any.
    pub async fn unregister(&self) {
        if let Some(address) = self.bound_address.lock().await.take() {
            self.transport.unbind(&address).await;
        }
    }

    /// invite(destUri, codec1, codec2, …) — place an outgoing call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInCall`] if a call is already pending or
    /// active.
    #[instrument(skip(self))]
    pub async fn invite(self: &Arc<Self>, dest_uri: &str, codecs: &[&str]) -> Result<(), Error> {
        {
            let mut call = self.call.lock().await;
            if !matches!(*call, CallState::Idle) {
                return Err(Error::AlreadyInCall);
            }
            let offer = offer_for(codecs);
            *call = CallState::Pending {
                direction: Direction::Outgoing,
                peer_uri: dest_uri.to_string(),
                offer,
                peer_media_addr: None,
            };
        }

        let offer = {
            let call = self.call.lock().await;
            match &*call {
                CallState::Pending { offer, .. } => offer.clone(),
                _ => unreachable!("just set to Pending above"),
            }
        };

        let local_transport = self.open_rtp_transport().await;
        let media_addr = local_transport.as_ref().map(|t| self.local_media_addr(t));
        let body = Some(describe_offer(&offer, media_addr));

        let request = Request { method: "INVITE".into(), to_uri: dest_uri.to_string(), body };
        let mut transactions = match self.transport.send_request(request).await {
            Ok(rx) => rx,
            Err(err) => {
                *self.call.lock().await = CallState::Idle;
                return Err(err);
            }
        };

        let outcome = tokio::time::timeout(self.invite_timeout, async {
            loop {
                match transactions.recv().await {
                    Some(Transaction::Provisional { .. }) => {
                        self.streaming_client.ringing("ringing").await;
                    }
                    Some(final_transaction @ Transaction::Final { .. }) => return Some(final_transaction),
                    Some(Transaction::Incoming { .. }) | None => return None,
                }
            }
        })
        .await;

        match outcome {
            Ok(Some(Transaction::Final { code, reason: _, body })) if (200..300).contains(&code) => {
                let (peer_offer, peer_addr) = body.as_deref().map(parse_offer).unwrap_or_default();
                let negotiated = negotiate(&offer, &peer_offer);
                if let (Some(transport), Some(peer_addr)) = (&local_transport, peer_addr) {
                    if let Err(err) = transport.connect(peer_addr).await {
                        warn!(%err, "failed to connect rtp transport to peer");
                    }
                }
                self.activate(dest_uri, negotiated, local_transport).await;
                Ok(())
            }
            Ok(Some(Transaction::Final { reason, .. })) => {
                *self.call.lock().await = CallState::Idle;
                self.streaming_client.rejected(&reason).await;
                Ok(())
            }
            Ok(_) => {
                *self.call.lock().await = CallState::Idle;
                self.streaming_client.rejected("no answer").await;
                Ok(())
            }
            Err(_) => {
                *self.call.lock().await = CallState::Idle;
                self.streaming_client.rejected("timeout").await;
                Err(Error::InvitationTimeout)
            }
        }
    }

    /// Deliver an incoming INVITE, queuing it for `accept`/`reject`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInCall`] if a call is already pending or
    /// active.
    pub async fn on_incoming_invite(&self, from_uri: &str, offer_body: Option<&str>) -> Result<(), Error> {
        let mut call = self.call.lock().await;
        if !matches!(*call, CallState::Idle) {
            return Err(Error::AlreadyInCall);
        }
        let (offer, peer_media_addr) = offer_body.map(parse_offer).unwrap_or_default();
        *call = CallState::Pending { direction: Direction::Incoming, peer_uri: from_uri.to_string(), offer, peer_media_addr };
        drop(call);
        self.streaming_client.invited(from_uri, "").await;
        Ok(())
    }

    /// accept(codec1, codec2, …) — accept the queued incoming
    /// invitation, negotiating against the supplied codec list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPendingInvitation`] if nothing is queued, or
    /// [`Error::IncompatibleSdp`] if no format overlaps.
    pub async fn accept(self: &Arc<Self>, codecs: &[&str]) -> Result<(), Error> {
        let (peer_uri, peer_offer, peer_addr) = {
            let call = self.call.lock().await;
            match &*call {
                CallState::Pending { direction: Direction::Incoming, peer_uri, offer, peer_media_addr } => {
                    (peer_uri.clone(), offer.clone(), *peer_media_addr)
                }
                _ => return Err(Error::NoPendingInvitation),
            }
        };

        let local_offer = offer_for(codecs);
        let negotiated = negotiate(&local_offer, &peer_offer);
        if negotiated.audio.is_none() && negotiated.video.is_none() {
            self.transport.send_response(&peer_uri, "INVITE", 488, "Incompatible SDP", None).await?;
            *self.call.lock().await = CallState::Idle;
            return Err(Error::IncompatibleSdp);
        }

        let local_transport = self.open_rtp_transport().await;
        if let (Some(transport), Some(peer_addr)) = (&local_transport, peer_addr) {
            if let Err(err) = transport.connect(peer_addr).await {
                warn!(%err, "failed to connect rtp transport to peer");
            }
        }
        let media_addr = local_transport.as_ref().map(|t| self.local_media_addr(t));
        let response_body = Some(describe_negotiated(&negotiated, media_addr));

        self.transport.send_response(&peer_uri, "INVITE", 200, "OK", response_body).await?;
        self.activate(&peer_uri, negotiated, local_transport).await;
        Ok(())
    }

    /// reject(reason) — finalize a queued incoming invitation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPendingInvitation`] if nothing is queued.
    pub async fn reject(&self, reason: Option<&str>) -> Result<(), Error> {
        let peer_uri = {
            let call = self.call.lock().await;
            match &*call {
                CallState::Pending { direction: Direction::Incoming, peer_uri, .. } => peer_uri.clone(),
                _ => return Err(Error::NoPendingInvitation),
            }
        };
        let (code, phrase) = split_reason(reason.unwrap_or(DEFAULT_REJECT_REASON));
        self.transport.send_response(&peer_uri, "INVITE", code, &phrase, None).await?;
        *self.call.lock().await = CallState::Idle;
        Ok(())
    }

    /// bye() — cancel a pending outgoing invite, or end an active call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] if there is nothing to end.
    pub async fn bye(&self) -> Result<(), Error> {
        let peer_uri = {
            let call = self.call.lock().await;
            match &*call {
                CallState::Pending { peer_uri, .. } | CallState::Active { peer_uri, .. } => peer_uri.clone(),
                CallState::Idle => return Err(Error::NoActiveCall),
            }
        };
        let request = Request { method: "BYE".into(), to_uri: peer_uri, body: None };
        let _ = self.transport.send_request(request).await;
        self.call_generation.fetch_add(1, Ordering::Relaxed);
        *self.call.lock().await = CallState::Idle;
        self.streaming_client.byed().await;
        Ok(())
    }

    /// hold(value) — propagate hold semantics via a session
    /// modification request with connection address `0.0.0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] if no call is active.
    pub async fn hold(&self, value: bool) -> Result<(), Error> {
        let mut call = self.call.lock().await;
        let CallState::Active { peer_uri, on_hold, .. } = &mut *call else {
            return Err(Error::NoActiveCall);
        };
        *on_hold = value;
        let peer_uri = peer_uri.clone();
        drop(call);

        let body = if value { Some("c=IN IP4 0.0.0.0".to_string()) } else { None };
        let request = Request { method: "INVITE".into(), to_uri: peer_uri, body };
        let _ = self.transport.send_request(request).await;
        self.streaming_client.holded(value).await;
        Ok(())
    }

    /// Report an incoming session modification to `0.0.0.0` as a hold
    /// indication from the peer (§4.6 "incoming 0.0.0.0 is reported ...
    /// as a 'holded' callback").
    pub async fn on_incoming_session_modification(&self, connection_address: &str) {
        let on_hold = connection_address == "0.0.0.0";
        if let CallState::Active { on_hold: current, .. } = &mut *self.call.lock().await {
            *current = on_hold;
        }
        self.streaming_client.holded(on_hold).await;
    }

    /// sendDTMF(digit) — emit one touch-tone event on the call's RTP
    /// leg if the peer advertised support for it (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] if no call is active. A digit
    /// outside `0-9*#A-D`, or a call with no touch-tone support or no
    /// open transport, is dropped silently, as the peer never asked for
    /// it.
    pub async fn send_dtmf(&self, digit: char) -> Result<(), Error> {
        let call = self.call.lock().await;
        let CallState::Active { bridge, transport, .. } = &*call else {
            return Err(Error::NoActiveCall);
        };
        if bridge.negotiated().audio.map(|f| f.name) != Some("touch-tone events") {
            debug!(%digit, "peer did not advertise touch-tone support, dropping dtmf");
            return Ok(());
        }
        let Some(transport) = transport else {
            debug!(%digit, "no rtp transport open for this call, dropping dtmf");
            return Ok(());
        };
        let Some(event) = dtmf_event_code(digit) else {
            debug!(%digit, "not a dtmf digit, dropping");
            return Ok(());
        };
        transport.send(&dtmf_payload(event), 0, true, DTMF_PAYLOAD_TYPE).await?;
        Ok(())
    }

    /// Audio direction A: one streaming-side audio message arrived on an
    /// active call; transcode it to the negotiated companded format and
    /// send it on the call's RTP leg.
    pub async fn send_audio_frame(&self, frame: &[u8], timestamp: u32) -> Result<(), Error> {
        let call = self.call.lock().await;
        let CallState::Active { bridge, transport, .. } = &*call else {
            return Err(Error::NoActiveCall);
        };
        let Some(transport) = transport else { return Ok(()) };
        let Some(format) = bridge.negotiated().audio else { return Ok(()) };
        let companded = bridge.audio_direction_a(frame)?;
        if companded.is_empty() {
            return Ok(());
        }
        transport.send(&companded, timestamp, false, format.payload_type).await?;
        Ok(())
    }

    /// Video direction A, proprietary format: chunk one streaming video
    /// message and send each fragment on the call's RTP leg.
    pub async fn send_video_frame(&self, message: &gw_media::video_proprietary::VideoMessage) -> Result<(), Error> {
        let mut call = self.call.lock().await;
        let CallState::Active { bridge, transport, .. } = &mut *call else {
            return Err(Error::NoActiveCall);
        };
        let Some(transport) = transport.clone() else { return Ok(()) };
        let Some(format) = bridge.negotiated().video else { return Ok(()) };
        let Some(fragments) = bridge.video_direction_a_proprietary(message) else { return Ok(()) };
        drop(call);
        for fragment in fragments {
            transport.send(&fragment, message.time, false, format.payload_type).await?;
        }
        Ok(())
    }

    async fn activate(self: &Arc<Self>, peer_uri: &str, negotiated: Negotiated, transport: Option<Arc<dyn RtpTransport>>) {
        let bridge = MediaBridge::new(negotiated, self.codec_module.clone());
        let generation = self.call_generation.fetch_add(1, Ordering::Relaxed) + 1;
        *self.call.lock().await =
            CallState::Active { peer_uri: peer_uri.to_string(), bridge, on_hold: false, transport: transport.clone() };
        let audio_label = negotiated.audio_label();
        let video_label = negotiated.video_label();
        self.streaming_client.accepted(wire_label_audio(audio_label), wire_label_video(video_label)).await;

        if let Some(transport) = transport {
            let agent = Arc::clone(self);
            tokio::spawn(async move { agent.run_inbound_rtp_loop(transport, generation).await });
        }
    }

    /// Open this call's RTP transport, or return `None` and let the call
    /// proceed without a media leg if the configured range is exhausted.
    async fn open_rtp_transport(&self) -> Option<Arc<dyn RtpTransport>> {
        match rtp_udp::open(self.rtp_config.bind_ip, self.rtp_config.port_range.clone(), self.rtp_config.max_retries).await {
            Ok(transport) => Some(Arc::new(transport) as Arc<dyn RtpTransport>),
            Err(err) => {
                warn!(%err, "failed to open rtp transport for call");
                None
            }
        }
    }

    fn local_media_addr(&self, transport: &Arc<dyn RtpTransport>) -> SocketAddr {
        SocketAddr::new(self.rtp_config.bind_ip, transport.local_media_port())
    }

    /// Audio/video direction B: drain inbound RTP packets for one call
    /// generation, handing decoded audio/reassembled video up to the
    /// streaming side. Exits once the call moves past `generation`.
    async fn run_inbound_rtp_loop(&self, transport: Arc<dyn RtpTransport>, generation: u64) {
        while self.call_generation.load(Ordering::Relaxed) == generation {
            let Some(packet) = transport.recv().await else { break };
            if self.call_generation.load(Ordering::Relaxed) != generation {
                break;
            }
            let mut call = self.call.lock().await;
            let CallState::Active { bridge, .. } = &mut *call else { break };
            if bridge.negotiated().audio.map(|f| f.payload_type) == Some(packet.format) {
                let pcm = bridge.audio_direction_b(&packet.payload);
                drop(call);
                self.streaming_client.inbound_audio(packet.timestamp, pcm).await;
            } else if bridge.negotiated().video.map(|f| f.payload_type) == Some(packet.format) {
                let reassembled = bridge.video_direction_b_proprietary(&packet.payload);
                drop(call);
                match reassembled {
                    Ok(Some(message)) => {
                        self.streaming_client.inbound_video(message.kind, message.time, message.body).await;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, "dropping malformed inbound video fragment"),
                }
            }
        }
    }
}

fn wire_label_audio(label: AudioLabel) -> Option<&'static str> {
    label.as_wire_str()
}

fn wire_label_video(label: VideoLabel) -> Option<&'static str> {
    label.as_wire_str()
}

fn split_reason(reason: &str) -> (u16, String) {
    match reason.split_once(' ') {
        Some((code, phrase)) if code.parse::<u16>().is_ok() => (code.parse().unwrap(), phrase.to_string()),
        _ => (603, reason.to_string()),
    }
}

/// RFC 2833 touch-tone events always ride payload type 101 (§4.7's
/// format table).
const DTMF_PAYLOAD_TYPE: u8 = 101;

fn dtmf_event_code(digit: char) -> Option<u8> {
    match digit {
        '0'..='9' => Some(digit as u8 - b'0'),
        '*' => Some(10),
        '#' => Some(11),
        'A'..='D' => Some(12 + (digit as u8 - b'A')),
        'a'..='d' => Some(12 + (digit as u8 - b'a')),
        _ => None,
    }
}

/// Build one RFC 2833 event payload: event code, end-of-event flag with
/// volume, and duration in timestamp units.
fn dtmf_payload(event: u8) -> [u8; 4] {
    let mut payload = [0u8; 4];
    payload[0] = event;
    payload[1] = 0x80 | 10;
    payload[2..4].copy_from_slice(&DTMF_EVENT_DURATION.to_be_bytes());
    payload
}

/// Render an offer/negotiated answer as real-SDP-like text: a
/// connection line naming this agent's media address, followed by one
/// `m=`/`a=rtpmap:` pair per offered format, so the peer can recover
/// both the codec list and the address to send RTP to.
fn describe_offer(formats: &[Format], media_addr: Option<SocketAddr>) -> String {
    let mut lines = Vec::new();
    if let Some(addr) = media_addr {
        lines.push(format!("c=IN IP4 {}", addr.ip()));
    }
    let port = media_addr.map_or(0, |a| a.port());
    for format in formats {
        let medium = match format.medium {
            Medium::Audio => "audio",
            Medium::Video => "video",
        };
        lines.push(format!("m={medium} {port} RTP/AVP {}", format.payload_type));
        lines.push(format!("a=rtpmap:{} {}", format.payload_type, format.name));
    }
    lines.join("\n")
}

fn describe_negotiated(negotiated: &Negotiated, media_addr: Option<SocketAddr>) -> String {
    let formats: Vec<Format> = [negotiated.audio, negotiated.video].into_iter().flatten().collect();
    describe_offer(&formats, media_addr)
}

/// Recover the offered/negotiated formats and the peer's media address
/// from [`describe_offer`]-shaped text.
fn parse_offer(body: &str) -> (Vec<Format>, Option<SocketAddr>) {
    let mut ip = None;
    let mut port = None;
    let mut names = Vec::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
            ip = rest.trim().parse::<IpAddr>().ok();
        } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some((_, name)) = rest.split_once(' ') {
                names.push(name.trim());
            }
        } else if let Some(rest) = line.strip_prefix("m=") {
            if let Some(p) = rest.split_whitespace().nth(1) {
                port = p.parse::<u16>().ok();
            }
        }
    }
    let formats = names.into_iter().filter_map(|name| gw_media::FORMATS.iter().find(|f| f.name == name).copied()).collect();
    let addr = ip.zip(port).map(|(ip, port)| SocketAddr::new(ip, port));
    (formats, addr)
}
