//! A minimal TCP client performing the real three-step handshake and
//! chunk/command framing against a live `StreamingAcceptor`, used to drive
//! connect/createStream/publish/play without a full player implementation.

use gw_amf::Value;
use gw_stream::chunk::{message_type, Assembler, Disassembler, Message, PROTOCOL_CHANNEL};
use gw_stream::command::{self, Command};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const HANDSHAKE_PAYLOAD_LEN: usize = 1536;

/// One end of the wire, driving handshake, command, and media exchange
/// the same way a real player/publisher client would.
pub struct RtmpTestClient {
    socket: TcpStream,
    assembler: Assembler,
    disassembler: Disassembler,
    read_buf: Vec<u8>,
}

impl RtmpTestClient {
    /// Connect to `addr` and complete the handshake.
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        Self::handshake(&mut socket).await;
        Self {
            socket,
            assembler: Assembler::new(1_073_741_824),
            disassembler: Disassembler::new(Assembler::DEFAULT_CHUNK_SIZE),
            read_buf: Vec::new(),
        }
    }

    async fn handshake(socket: &mut TcpStream) {
        let mut c0c1 = vec![3u8];
        c0c1.extend(std::iter::repeat(0u8).take(HANDSHAKE_PAYLOAD_LEN));
        socket.write_all(&c0c1).await.unwrap();

        let mut s0s1 = vec![0u8; 1 + HANDSHAKE_PAYLOAD_LEN];
        socket.read_exact(&mut s0s1).await.unwrap();
        let mut s2 = vec![0u8; HANDSHAKE_PAYLOAD_LEN];
        socket.read_exact(&mut s2).await.unwrap();

        // Echo S1 back as our C2, same as the server's own handshake step.
        let c2 = s0s1[1..].to_vec();
        socket.write_all(&c2).await.unwrap();
    }

    /// Send a command message on channel 3, stream id 0.
    pub async fn send_command(&mut self, name: &str, id: f64, body: Value, args: &[Value]) {
        self.send_command_on_stream(3, 0, name, id, body, args).await;
    }

    /// Send a command message tagged with a specific stream id (`publish`,
    /// `play`, `closeStream` all ride on their allocated stream's id).
    pub async fn send_command_on_stream(
        &mut self,
        channel: u32,
        stream_id: u32,
        name: &str,
        id: f64,
        body: Value,
        args: &[Value],
    ) {
        let mut data = Vec::new();
        command::encode(&mut data, name, id, &body, args, 0).unwrap();
        let message = Message {
            channel,
            timestamp: 0,
            message_type: message_type::COMMAND_AMF0,
            stream_id,
            data,
        };
        self.write_message(&message).await;
    }

    /// Send one audio or video message on `stream_id`.
    pub async fn send_media(&mut self, kind: u8, stream_id: u32, timestamp: u32, data: Vec<u8>) {
        let channel = if kind == message_type::VIDEO { 6 } else { 7 };
        self.write_message(&Message {
            channel,
            timestamp,
            message_type: kind,
            stream_id,
            data,
        })
        .await;
    }

    async fn write_message(&mut self, message: &Message) {
        let wire = self.disassembler.write(message);
        self.socket.write_all(&wire).await.unwrap();
    }

    /// Read and return the next fully reassembled message, whatever its
    /// type (protocol, command, or media).
    ///
    /// A `SET_CHUNK_SIZE` from the peer is applied to this client's own
    /// [`Assembler`] before the message is handed back, the same way a
    /// real player adopts the peer's chunk size immediately.
    pub async fn recv_message(&mut self) -> Message {
        loop {
            if let Some(message) = self.try_drain() {
                if message.channel == PROTOCOL_CHANNEL && message.message_type == message_type::SET_CHUNK_SIZE {
                    if let Ok(bytes) = message.data[..4].try_into() {
                        self.assembler.set_chunk_size(u32::from_be_bytes(bytes) as usize);
                    }
                }
                return message;
            }
            let mut chunk = [0u8; 4096];
            let n = self.socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer closed the connection unexpectedly");
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read messages until the next command arrives, skipping protocol
    /// and media messages, and decode it.
    pub async fn recv_command(&mut self) -> Command {
        loop {
            let message = self.recv_message().await;
            if message.channel == PROTOCOL_CHANNEL {
                continue;
            }
            if matches!(message.message_type, message_type::COMMAND_AMF0 | message_type::COMMAND_AMF3) {
                let version = if message.message_type == message_type::COMMAND_AMF3 { 3 } else { 0 };
                let mut cmd = command::decode(&message.data, version).unwrap();
                cmd.stream_id = message.stream_id;
                return cmd;
            }
        }
    }

    /// Read messages until the next audio/video message arrives.
    pub async fn recv_media(&mut self) -> Message {
        loop {
            let message = self.recv_message().await;
            if matches!(message.message_type, message_type::AUDIO | message_type::VIDEO) {
                return message;
            }
        }
    }

    fn try_drain(&mut self) -> Option<Message> {
        loop {
            match self.assembler.feed(&self.read_buf) {
                Ok((consumed, message)) => {
                    self.read_buf.drain(..consumed);
                    if message.is_some() {
                        return message;
                    }
                    if self.read_buf.is_empty() {
                        return None;
                    }
                }
                Err(_) => return None,
            }
        }
    }
}
