//! One TCP connection: handshake, the read/dispatch loop, and the
//! per-connection stream registry (§4.1, §4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use gw_amf::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::app::{ConnectionId, Registry, StreamHandle, StreamTable};
use crate::chunk::{message_type, user_control, Assembler, Disassembler, Message, PROTOCOL_CHANNEL};
use crate::command::{self, name};
use crate::error::{ChunkError, CommandError, Error};
use crate::io::ScopedSocket;

/// Default acknowledgement window advertised on `connect` (§4.2, E1).
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 1_073_741_824;

/// Outbound chunk size a `play`ing stream raises to (§4.2 `play`: "not
/// less than 4096 bytes").
pub const PLAY_CHUNK_SIZE: usize = 4096;

const HANDSHAKE_PAYLOAD_LEN: usize = 1536;
const POLICY_REQUEST: &[u8; 23] = b"<policy-file-request/>\0";
const POLICY_RESPONSE: &[u8] = b"<?xml version=\"1.0\"?><cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"*\"/></cross-domain-policy>\0";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Command dispatch channel (§4.2 "any other -> dispatch to the
/// application's command handler").
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a command not recognized by the core (anything other than
    /// connect/createStream/closeStream/publish/play/pause/seek).
    ///
    /// Returning `Ok(Some(value))` sends a single-argument `_result`;
    /// `Ok(None)` sends nothing; `Err(reason)` sends an `_error` with an
    /// empty argument list.
    async fn handle(&self, connection_id: ConnectionId, command: &command::Command) -> Result<Option<Value>, String>;

    /// Called when `connect` is received, before the core accepts it.
    /// Returning `Err(reason)` rejects the connection.
    async fn on_connect(&self, connection_id: ConnectionId, app_name: &str) -> Result<(), String> {
        let _ = (connection_id, app_name);
        Ok(())
    }

    /// Called for every AUDIO/VIDEO message arriving on a connection's
    /// `connect`ed app, before the core's plain fan-out runs. Returning
    /// `true` means this handler consumed the message (e.g. bridged it
    /// to a call's media leg) and the core must not also fan it out to
    /// the app's other subscribers.
    async fn handle_media(&self, connection_id: ConnectionId, app_name: &str, message: &Message) -> bool {
        let _ = (connection_id, app_name, message);
        false
    }
}

/// A no-op handler used when the embedding server has no custom commands.
pub struct NullHandler;

#[async_trait::async_trait]
impl CommandHandler for NullHandler {
    async fn handle(&self, _connection_id: ConnectionId, _command: &command::Command) -> Result<Option<Value>, String> {
        Ok(None)
    }
}

/// One accepted TCP connection and its protocol state (§3 "Connection").
pub struct Connection {
    id: ConnectionId,
    socket: ScopedSocket,
    read_buf: BytesMut,
    assembler: Assembler,
    disassembler: Disassembler,
    object_encoding: u8,
    streams: StreamTable,
    app_name: Option<String>,
    registry: Arc<Registry>,
    handler: Arc<dyn CommandHandler>,
    media_tx: mpsc::Sender<Message>,
    media_rx: mpsc::Receiver<Message>,
}

impl Connection {
    /// Take ownership of an accepted socket and prepare its protocol
    /// state. Does not perform I/O.
    #[must_use]
    pub fn new(socket: TcpStream, registry: Arc<Registry>, handler: Arc<dyn CommandHandler>) -> Self {
        let (media_tx, media_rx) = mpsc::channel(128);
        let peer = socket.peer_addr().unwrap_or_else(|_| ([0, 0, 0, 0], 0).into());
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            socket: ScopedSocket::new(socket, peer),
            read_buf: BytesMut::with_capacity(4096),
            assembler: Assembler::new(DEFAULT_WINDOW_ACK_SIZE),
            disassembler: Disassembler::new(Assembler::DEFAULT_CHUNK_SIZE),
            object_encoding: 0,
            streams: StreamTable::default(),
            app_name: None,
            registry,
            handler,
            media_tx,
            media_rx,
        }
    }

    /// This connection's id, stable for its lifetime.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// A sender feeding this connection's write loop directly, the same
    /// channel `publish`/`play` hand out as a [`StreamHandle`] (§4.2
    /// "Fan-out"). A [`CommandHandler`] can clone this before `run`
    /// consumes the connection to push call-control events (an `onStatus`,
    /// an invitation, a hangup) asynchronously, outside the request/response
    /// shape `handle` returns.
    #[must_use]
    pub fn event_sender(&self) -> mpsc::Sender<Message> {
        self.media_tx.clone()
    }

    /// Run the handshake, then the read/dispatch loop until the peer
    /// closes the socket or a protocol error occurs.
    pub async fn run(mut self) -> Result<(), Error> {
        if !self.handshake().await? {
            return Ok(());
        }
        tracing::debug!(connection = self.id, "handshake complete, connection active");

        loop {
            tokio::select! {
                biased;
                media = self.media_rx.recv() => {
                    match media {
                        Some(msg) => self.write_message(&msg).await?,
                        None => break,
                    }
                }
                result = self.socket.get_mut().read_buf(&mut self.read_buf) => {
                    let n = result?;
                    if n == 0 {
                        break;
                    }
                    self.drain_chunks().await?;
                }
            }
        }

        self.on_disconnect();
        Ok(())
    }

    /// Performs the 3-step handshake (§4.1 "Handshake"), or the
    /// cross-domain policy shortcut. Returns `false` if the connection was
    /// closed as part of the shortcut.
    async fn handshake(&mut self) -> Result<bool, Error> {
        let mut prefix = [0u8; POLICY_REQUEST.len()];
        self.socket.get_mut().read_exact(&mut prefix).await?;

        if &prefix == POLICY_REQUEST {
            self.socket.get_mut().write_all(POLICY_RESPONSE).await?;
            self.socket.get_mut().shutdown().await?;
            return Ok(false);
        }

        // `prefix[0]` is C0 (the handshake version byte); the remaining
        // bytes of `prefix` are the start of C1.
        let mut c1 = vec![0u8; HANDSHAKE_PAYLOAD_LEN];
        c1[..prefix.len() - 1].copy_from_slice(&prefix[1..]);
        self.socket.get_mut().read_exact(&mut c1[prefix.len() - 1..]).await?;

        let mut response = Vec::with_capacity(1 + 2 * HANDSHAKE_PAYLOAD_LEN);
        response.push(prefix[0]);
        response.extend(std::iter::repeat(0u8).take(HANDSHAKE_PAYLOAD_LEN));
        response.extend_from_slice(&c1);
        self.socket.get_mut().write_all(&response).await?;

        let mut c2 = vec![0u8; HANDSHAKE_PAYLOAD_LEN];
        self.socket.get_mut().read_exact(&mut c2).await?;
        Ok(true)
    }

    /// Pull as many complete chunks as the read buffer currently holds.
    async fn drain_chunks(&mut self) -> Result<(), Error> {
        loop {
            match self.assembler.feed(&self.read_buf) {
                Ok((consumed, message)) => {
                    let _ = self.read_buf.split_to(consumed);
                    if let Some(message) = message {
                        self.handle_message(message).await?;
                    }
                    if self.assembler.needs_ack() {
                        self.send_window_ack().await?;
                        self.assembler.ack_sent();
                    }
                }
                Err(ChunkError::TooShort { .. }) => return Ok(()),
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), Error> {
        if message.channel == PROTOCOL_CHANNEL {
            return self.handle_protocol_message(message).await;
        }
        if matches!(message.message_type, message_type::COMMAND_AMF0 | message_type::COMMAND_AMF3) {
            let version = if message.message_type == message_type::COMMAND_AMF3 { 3 } else { self.object_encoding };
            let mut cmd = command::decode(&message.data, version)?;
            cmd.stream_id = message.stream_id;
            return self.dispatch_command(cmd).await;
        }
        if matches!(message.message_type, message_type::AUDIO | message_type::VIDEO) {
            if let Some(app_name) = self.app_name.clone() {
                if self.handler.handle_media(self.id, &app_name, &message).await {
                    return Ok(());
                }
                if let Some(stream_name) = self.streams_name_for(message.stream_id) {
                    if let Some(app) = self.registry.peek(&app_name) {
                        app.fan_out(&stream_name, &message).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn streams_name_for(&self, stream_id: u32) -> Option<String> {
        self.streams.name_of(stream_id)
    }

    async fn handle_protocol_message(&mut self, message: Message) -> Result<(), Error> {
        match message.message_type {
            message_type::SET_CHUNK_SIZE => {
                if message.data.len() >= 4 {
                    let size = u32::from_be_bytes([
                        message.data[0],
                        message.data[1],
                        message.data[2],
                        message.data[3],
                    ]) as usize;
                    self.assembler.set_chunk_size(size);
                }
            }
            message_type::USER_CONTROL => {
                if message.data.len() >= 2 {
                    let code = u16::from_be_bytes([message.data[0], message.data[1]]);
                    if code == user_control::SET_BUFFER_LENGTH && message.data.len() >= 6 {
                        let stream_id =
                            u32::from_be_bytes(message.data[2..6].try_into().unwrap());
                        self.send_stream_begin(stream_id).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn dispatch_command(&mut self, cmd: command::Command) -> Result<(), Error> {
        match cmd.name.as_str() {
            name::CONNECT => self.handle_connect(cmd).await,
            name::CREATE_STREAM => self.handle_create_stream(cmd).await,
            name::CLOSE_STREAM => self.handle_close_stream(cmd).await,
            name::PUBLISH => self.handle_publish(cmd).await,
            name::PLAY => self.handle_play(cmd).await,
            name::PAUSE => self.handle_pause_or_seek(cmd, "NetStream.Pause.Notify").await,
            name::SEEK => self.handle_pause_or_seek(cmd, "NetStream.Seek.Notify").await,
            _ => self.handle_application_command(cmd).await,
        }
    }

    async fn handle_connect(&mut self, cmd: command::Command) -> Result<(), Error> {
        let object_encoding = match command::negotiate_object_encoding(&cmd.body) {
            Ok(v) => v,
            Err(e) => {
                self.send_command_status(
                    0.0,
                    name::ERROR,
                    &command::status_object("error", "NetConnection.Connect.Rejected", &e.to_string()),
                )
                .await?;
                return Err(e.into());
            }
        };
        self.object_encoding = object_encoding;

        let app_name = cmd
            .body
            .get("app")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if let Err(reason) = self.handler.on_connect(self.id, &app_name).await {
            self.send_command_status(
                cmd.id,
                name::ERROR,
                &command::status_object("error", "NetConnection.Connect.Rejected", &reason),
            )
            .await?;
            return Err(CommandError::ApplicationReject(reason).into());
        }

        let app = self.registry.get_or_create(&app_name);
        app.join(self.id);
        self.app_name = Some(app_name);

        self.send_window_ack_size(DEFAULT_WINDOW_ACK_SIZE).await?;
        self.send_command_status(
            cmd.id,
            name::RESULT,
            &command::status_object(
                "status",
                "NetConnection.Connect.Success",
                "Connection succeeded.",
            ),
        )
        .await
    }

    async fn handle_create_stream(&mut self, cmd: command::Command) -> Result<(), Error> {
        let stream_id = self.streams.allocate();
        self.send_command(cmd.id, name::RESULT, &Value::Null, &[Value::Number(f64::from(stream_id))])
            .await
    }

    async fn handle_close_stream(&mut self, cmd: command::Command) -> Result<(), Error> {
        self.retire_stream(cmd.stream_id);
        Ok(())
    }

    async fn handle_publish(&mut self, cmd: command::Command) -> Result<(), Error> {
        let stream_id = cmd.stream_id;
        let stream_name = cmd
            .args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(app_name) = self.app_name.clone() else {
            return Err(CommandError::UnknownStream(stream_id).into());
        };
        let app = self.registry.get_or_create(&app_name);

        let handle = StreamHandle {
            connection_id: self.id,
            stream_id,
            sender: self.media_tx.clone(),
        };
        if let Err(e) = app.publish(&stream_name, handle) {
            return Err(e.into());
        }
        self.streams.bind(stream_id, stream_name);

        self.send_status_on_stream(
            stream_id,
            &command::status_object("status", "NetStream.Publish.Start", "Publishing."),
        )
        .await
    }

    async fn handle_play(&mut self, cmd: command::Command) -> Result<(), Error> {
        let stream_id = cmd.stream_id;
        let stream_name = cmd
            .args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(app_name) = self.app_name.clone() else {
            return Err(CommandError::UnknownStream(stream_id).into());
        };
        let app = self.registry.get_or_create(&app_name);

        let handle = StreamHandle {
            connection_id: self.id,
            stream_id,
            sender: self.media_tx.clone(),
        };
        app.play(&stream_name, handle);
        self.streams.bind(stream_id, stream_name);
        self.send_set_chunk_size(PLAY_CHUNK_SIZE as u32).await?;
        self.disassembler.set_chunk_size(PLAY_CHUNK_SIZE);

        self.send_stream_begin(stream_id).await?;
        self.send_status_on_stream(
            stream_id,
            &command::status_object("status", "NetStream.Play.Start", "Playback started."),
        )
        .await
    }

    async fn handle_pause_or_seek(&mut self, cmd: command::Command, status_code: &str) -> Result<(), Error> {
        let stream_id = cmd.stream_id;
        self.send_status_on_stream(
            stream_id,
            &command::status_object("status", status_code, "Acknowledged."),
        )
        .await
    }

    async fn handle_application_command(&mut self, cmd: command::Command) -> Result<(), Error> {
        match self.handler.handle(self.id, &cmd).await {
            Ok(Some(value)) => self.send_command(cmd.id, name::RESULT, &Value::Null, &[value]).await,
            Ok(None) => Ok(()),
            Err(reason) => {
                self.send_command(
                    cmd.id,
                    name::ERROR,
                    &command::status_object("error", "NetConnection.Call.Failed", &reason),
                    &[],
                )
                .await
            }
        }
    }

    fn retire_stream(&mut self, stream_id: u32) {
        self.streams.unbind(stream_id);
        if let Some(app_name) = &self.app_name {
            if let Some(app) = self.registry.peek(app_name) {
                // A connection can own several Streams; retiring one must
                // not touch the others, so only this stream's
                // publish/player registrations are dropped.
                app.retire_stream(self.id, stream_id);
            }
        }
    }

    fn on_disconnect(&mut self) {
        self.streams.drain();
        if let Some(app_name) = self.app_name.take() {
            if let Some(app) = self.registry.peek(&app_name) {
                app.retire(self.id);
                self.registry.destroy_if_empty(&app_name);
            }
        }
    }

    async fn write_message(&mut self, message: &Message) -> Result<(), Error> {
        let wire = self.disassembler.write(message);
        self.socket.get_mut().write_all(&wire).await?;
        Ok(())
    }

    async fn send_window_ack(&mut self) -> Result<(), Error> {
        let total = self.assembler.total_bytes() as u32;
        self.write_message(&Message {
            channel: PROTOCOL_CHANNEL,
            timestamp: 0,
            message_type: message_type::ACKNOWLEDGEMENT,
            stream_id: 0,
            data: total.to_be_bytes().to_vec(),
        })
        .await
    }

    async fn send_window_ack_size(&mut self, size: u32) -> Result<(), Error> {
        self.write_message(&Message {
            channel: PROTOCOL_CHANNEL,
            timestamp: 0,
            message_type: message_type::WINDOW_ACK_SIZE,
            stream_id: 0,
            data: size.to_be_bytes().to_vec(),
        })
        .await
    }

    /// Tell the peer to adopt a new outbound chunk size (§4.1 "target must
    /// adopt immediately"), before any chunk framed at that size reaches it.
    async fn send_set_chunk_size(&mut self, size: u32) -> Result<(), Error> {
        self.write_message(&Message {
            channel: PROTOCOL_CHANNEL,
            timestamp: 0,
            message_type: message_type::SET_CHUNK_SIZE,
            stream_id: 0,
            data: size.to_be_bytes().to_vec(),
        })
        .await
    }

    async fn send_stream_begin(&mut self, stream_id: u32) -> Result<(), Error> {
        let mut data = user_control::STREAM_BEGIN.to_be_bytes().to_vec();
        data.extend_from_slice(&stream_id.to_be_bytes());
        self.write_message(&Message {
            channel: PROTOCOL_CHANNEL,
            timestamp: 0,
            message_type: message_type::USER_CONTROL,
            stream_id: 0,
            data,
        })
        .await
    }

    async fn send_command(&mut self, id: f64, name: &str, body: &Value, args: &[Value]) -> Result<(), Error> {
        let mut data = Vec::new();
        command::encode(&mut data, name, id, body, args, self.object_encoding)?;
        self.write_message(&Message {
            channel: 3,
            timestamp: 0,
            message_type: message_type::COMMAND_AMF0,
            stream_id: 0,
            data,
        })
        .await
    }

    async fn send_command_status(&mut self, id: f64, name: &str, status: &Value) -> Result<(), Error> {
        self.send_command(id, name, &Value::Null, &[status.clone()]).await
    }

    async fn send_status_on_stream(&mut self, stream_id: u32, status: &Value) -> Result<(), Error> {
        let mut data = Vec::new();
        command::encode(&mut data, name::ON_STATUS, 0.0, &Value::Null, &[status.clone()], self.object_encoding)?;
        self.write_message(&Message {
            channel: 5,
            timestamp: 0,
            message_type: message_type::COMMAND_AMF0,
            stream_id,
            data,
        })
        .await
    }
}
