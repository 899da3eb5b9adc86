//! The bridge application's [`CommandHandler`] (§4.6): wires a
//! [`gw_signaling::UserAgent`] to each connection on the bridge
//! application path, and pushes its indications back to the connection as
//! `gw-stream` command messages.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gw_amf::Value;
use gw_media::vbr::AudioCodecModule;
use gw_signaling::{StreamingClient, UserAgent};
use gw_stream::app::ConnectionId;
use gw_stream::chunk::{message_type, Message};
use gw_stream::command::{self, Command};
use gw_stream::connection::CommandHandler;
use tokio::sync::mpsc;

/// The application name a connection must `connect` with to get the
/// signaling bridge wired up; any other `app` behaves as a plain
/// publish/play endpoint.
pub const BRIDGE_APP_NAME: &str = "sip";

mod event {
    pub const RINGING: &str = "ringing";
    pub const ACCEPTED: &str = "accepted";
    pub const REJECTED: &str = "rejected";
    pub const INVITED: &str = "invited";
    pub const CANCELLED: &str = "cancelled";
    pub const BYED: &str = "byed";
    pub const HOLDED: &str = "holded";
}

/// Pushes [`StreamingClient`] indications to one connection's write task by
/// encoding them as `onStatus`-shaped command messages on its event
/// channel (§4.6, §6.4).
struct ConnectionStreamingClient {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Message>,
}

impl ConnectionStreamingClient {
    async fn send(&self, name: &str, args: &[Value]) {
        let mut data = Vec::new();
        if let Err(e) = command::encode(&mut data, name, 0.0, &Value::Null, args, 0) {
            tracing::warn!(connection = self.connection_id, event = name, error = %e, "failed to encode indication");
            return;
        }
        let message = Message {
            channel: 3,
            timestamp: 0,
            message_type: message_type::COMMAND_AMF0,
            stream_id: 0,
            data,
        };
        let _ = self.sender.send(message).await;
    }
}

#[async_trait]
impl StreamingClient for ConnectionStreamingClient {
    async fn ringing(&self, reason: &str) {
        self.send(event::RINGING, &[Value::str(reason)]).await;
    }

    async fn accepted(&self, audio: Option<&str>, video: Option<&str>) {
        let to_value = |label: Option<&str>| label.map_or(Value::Null, Value::str);
        self.send(event::ACCEPTED, &[to_value(audio), to_value(video)]).await;
    }

    async fn rejected(&self, reason: &str) {
        self.send(event::REJECTED, &[Value::str(reason)]).await;
    }

    async fn invited(&self, from_uri: &str, to_uri: &str) {
        self.send(event::INVITED, &[Value::str(from_uri), Value::str(to_uri)]).await;
    }

    async fn cancelled(&self, from_uri: &str, to_uri: &str) {
        self.send(event::CANCELLED, &[Value::str(from_uri), Value::str(to_uri)]).await;
    }

    async fn byed(&self) {
        self.send(event::BYED, &[]).await;
    }

    async fn holded(&self, on_hold: bool) {
        self.send(event::HOLDED, &[Value::Boolean(on_hold)]).await;
    }

    async fn inbound_audio(&self, timestamp: u32, pcm: Vec<i16>) {
        let mut data = Vec::with_capacity(1 + pcm.len() * 2);
        data.push(0);
        data.extend(pcm.iter().flat_map(|sample| sample.to_be_bytes()));
        let message = Message { channel: 7, timestamp, message_type: message_type::AUDIO, stream_id: 0, data };
        let _ = self.sender.send(message).await;
    }

    async fn inbound_video(&self, kind: u32, timestamp: u32, body: Vec<u8>) {
        let message = Message {
            channel: 6,
            timestamp,
            message_type: u8::try_from(kind).unwrap_or(message_type::VIDEO),
            stream_id: 0,
            data: body,
        };
        let _ = self.sender.send(message).await;
    }
}

/// `CommandHandler` for the gateway's bridge application: on `connect` to
/// [`BRIDGE_APP_NAME`], builds a [`UserAgent`] over the shared signaling
/// transport; every other command not named in `gw-stream::command::name`
/// dispatches to it as a register/invite/accept/reject/bye/hold/sendDTMF
/// call (§6.4).
pub struct BridgeHandler {
    transport: Arc<dyn gw_signaling::SignalingTransport>,
    codec_module: Option<Arc<dyn AudioCodecModule>>,
    rtp_config: gw_signaling::RtpConfig,
    agents: DashMap<ConnectionId, Arc<UserAgent>>,
    event_senders: DashMap<ConnectionId, mpsc::Sender<Message>>,
}

impl BridgeHandler {
    /// Build a handler sharing one signaling transport across every
    /// connection's user agent.
    #[must_use]
    pub fn new(transport: Arc<dyn gw_signaling::SignalingTransport>, codec_module: Option<Arc<dyn AudioCodecModule>>) -> Self {
        Self {
            transport,
            codec_module,
            rtp_config: gw_signaling::RtpConfig::default(),
            agents: DashMap::new(),
            event_senders: DashMap::new(),
        }
    }

    /// Override where each connection's user agent opens its calls' RTP
    /// media sockets (§6.3 and §6.5 `media_port_start`/`media_port_end`/
    /// `media_port_retries`).
    #[must_use]
    pub fn with_rtp_config(mut self, rtp_config: gw_signaling::RtpConfig) -> Self {
        self.rtp_config = rtp_config;
        self
    }

    /// Record the channel the acceptor feeds `connection_id`'s write loop,
    /// so indications can reach it once a user agent is built for it.
    pub fn register_connection(&self, connection_id: ConnectionId, sender: mpsc::Sender<Message>) {
        self.event_senders.insert(connection_id, sender);
    }

    /// Drop everything this connection owned, on disconnect.
    pub fn unregister_connection(&self, connection_id: ConnectionId) {
        self.event_senders.remove(&connection_id);
        self.agents.remove(&connection_id);
    }

    fn agent_for(&self, connection_id: ConnectionId) -> Option<Arc<UserAgent>> {
        self.agents.get(&connection_id).map(|entry| entry.clone())
    }

    fn codec_args(args: &[Value]) -> Vec<String> {
        if let Some(Value::Array(items)) = args.first() {
            return items.iter().filter_map(Value::as_str).map(str::to_string).collect();
        }
        args.iter().filter_map(Value::as_str).map(str::to_string).collect()
    }
}

#[async_trait]
impl CommandHandler for BridgeHandler {
    async fn on_connect(&self, connection_id: ConnectionId, app_name: &str) -> Result<(), String> {
        if app_name != BRIDGE_APP_NAME {
            return Ok(());
        }
        let Some(sender) = self.event_senders.get(&connection_id).map(|e| e.clone()) else {
            return Err("connection not registered".to_string());
        };
        let streaming_client: Arc<dyn StreamingClient> = Arc::new(ConnectionStreamingClient { connection_id, sender });
        let mut agent = UserAgent::new(self.transport.clone(), streaming_client).with_rtp_config(self.rtp_config.clone());
        if let Some(module) = &self.codec_module {
            agent = agent.with_codec_module(module.clone());
        }
        self.agents.insert(connection_id, Arc::new(agent));
        Ok(())
    }

    async fn handle(&self, connection_id: ConnectionId, command: &Command) -> Result<Option<Value>, String> {
        let Some(agent) = self.agent_for(connection_id) else {
            return Err("connection is not a bridge endpoint".to_string());
        };

        match command.name.as_str() {
            "register" => {
                let address = command.args.first().and_then(Value::as_str).ok_or("register requires an address")?;
                let password = command.args.get(1).and_then(Value::as_str).unwrap_or_default();
                let expiry = command.args.get(2).and_then(Value::as_f64).unwrap_or(3600.0) as u32;
                agent.register(address, password, expiry).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            "unregister" => {
                agent.unregister().await;
                Ok(None)
            }
            "invite" => {
                let dest = command.args.first().and_then(Value::as_str).ok_or("invite requires a destination")?;
                let codecs = Self::codec_args(command.args.get(1..).unwrap_or(&[]));
                let codec_refs: Vec<&str> = codecs.iter().map(String::as_str).collect();
                agent.invite(dest, &codec_refs).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            "accept" => {
                let codecs = Self::codec_args(&command.args);
                let codec_refs: Vec<&str> = codecs.iter().map(String::as_str).collect();
                agent.accept(&codec_refs).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            "reject" => {
                let reason = command.args.first().and_then(Value::as_str);
                agent.reject(reason).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            "bye" => {
                agent.bye().await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            "hold" => {
                let value = command.args.first().map(|v| matches!(v, Value::Boolean(true))).unwrap_or(true);
                agent.hold(value).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            "sendDTMF" => {
                let digit = command
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|s| s.chars().next())
                    .ok_or("sendDTMF requires a digit")?;
                agent.send_dtmf(digit).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            other => Err(format!("unknown bridge command: {other}")),
        }
    }

    async fn handle_media(&self, connection_id: ConnectionId, app_name: &str, message: &Message) -> bool {
        if app_name != BRIDGE_APP_NAME {
            return false;
        }
        let Some(agent) = self.agent_for(connection_id) else {
            return false;
        };
        match message.message_type {
            message_type::AUDIO => {
                if message.data.is_empty() {
                    return true;
                }
                let payload = &message.data[1..];
                if let Err(err) = agent.send_audio_frame(payload, message.timestamp).await {
                    tracing::warn!(connection = connection_id, error = %err, "audio bridge send failed");
                }
                true
            }
            message_type::VIDEO => {
                let video_message = gw_media::video_proprietary::VideoMessage {
                    kind: u32::from(message.message_type),
                    time: message.timestamp,
                    body: message.data.clone(),
                };
                if let Err(err) = agent.send_video_frame(&video_message).await {
                    tracing::warn!(connection = connection_id, error = %err, "video bridge send failed");
                }
                true
            }
            _ => false,
        }
    }
}
