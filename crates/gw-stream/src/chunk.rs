//! Chunk framing: basic/message headers, per-channel header compression,
//! window acknowledgement, chunk-size negotiation and user-control
//! messages (§4.1).

use std::collections::HashMap;

use crate::error::ChunkError;

/// Protocol channel carrying chunk-size, window-ack and user-control
/// messages (§4.1 "The protocol channel (id 2)").
pub const PROTOCOL_CHANNEL: u32 = 2;

/// Message type bytes the protocol channel and media channels carry.
pub mod message_type {
    /// Acknowledgement of bytes received so far.
    pub const ACKNOWLEDGEMENT: u8 = 3;
    /// User-control message (event code + payload).
    pub const USER_CONTROL: u8 = 4;
    /// Window acknowledgement size announcement.
    pub const WINDOW_ACK_SIZE: u8 = 5;
    /// Chunk size negotiation.
    pub const SET_CHUNK_SIZE: u8 = 1;
    /// Audio message.
    pub const AUDIO: u8 = 8;
    /// Video message.
    pub const VIDEO: u8 = 9;
    /// AMF0 command.
    pub const COMMAND_AMF0: u8 = 20;
    /// AMF3 command.
    pub const COMMAND_AMF3: u8 = 17;
}

/// User-control event codes (§4.1).
pub mod user_control {
    /// Server → client: playback of the named stream has begun.
    pub const STREAM_BEGIN: u16 = 0;
    /// Client → server: echo of the requested client buffer length.
    pub const SET_BUFFER_LENGTH: u16 = 3;
}

/// A fully reassembled message: header metadata plus payload (§4.1
/// "Reassembly").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel this message arrived on.
    pub channel: u32,
    /// Absolute timestamp in milliseconds.
    pub timestamp: u32,
    /// Message type byte.
    pub message_type: u8,
    /// Stream id this message belongs to.
    pub stream_id: u32,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// The four message-header forms (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderForm {
    Full,
    Message,
    Time,
    Separator,
}

impl HeaderForm {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => Self::Full,
            0b01 => Self::Message,
            0b10 => Self::Time,
            _ => Self::Separator,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Full => 0b00,
            Self::Message => 0b01,
            Self::Time => 0b10,
            Self::Separator => 0b11,
        }
    }
}

/// Per-channel state carried across chunks so headers can be compressed
/// (§4.1 "Per-channel state carries...").
#[derive(Debug, Clone, Default)]
struct ChannelState {
    timestamp: u32,
    delta: u32,
    size: u32,
    message_type: u8,
    stream_id: u32,
    partial: Vec<u8>,
    have_header: bool,
}

/// Incrementally parses chunks off a byte stream into complete
/// [`Message`]s, tracking per-channel compression state and the read
/// window (§4.1 "Reassembly").
pub struct Assembler {
    channels: HashMap<u32, ChannelState>,
    chunk_size: usize,
    window_size: u32,
    bytes_since_ack: u32,
    total_bytes: u64,
}

impl Assembler {
    /// Default chunk size before any `SET_CHUNK_SIZE` negotiation (§4.1).
    pub const DEFAULT_CHUNK_SIZE: usize = 128;

    /// Create an assembler with the default chunk size and the given read
    /// window (§4.2 `window-ack-size`, default `1_073_741_824`).
    #[must_use]
    pub fn new(window_size: u32) -> Self {
        Self {
            channels: HashMap::new(),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            window_size,
            bytes_since_ack: 0,
            total_bytes: 0,
        }
    }

    /// Update the incoming chunk size (peer sent `SET_CHUNK_SIZE`).
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size;
    }

    /// Total bytes received so far, used for acknowledgement accounting.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Feed one raw chunk (basic header onward) from `buf`, returning the
    /// number of bytes consumed and, if the channel's buffer just reached
    /// its declared size, the completed message.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError`] if `buf` is too short for the header form it
    /// declares, or if a compressed header (MESSAGE/TIME/SEPARATOR)
    /// arrives on a channel with no prior FULL header.
    pub fn feed(&mut self, buf: &[u8]) -> Result<(usize, Option<Message>), ChunkError> {
        let (channel, form, basic_len) = parse_basic_header(buf)?;
        let mut offset = basic_len;

        let header_len = match form {
            HeaderForm::Full => 11,
            HeaderForm::Message => 7,
            HeaderForm::Time => 3,
            HeaderForm::Separator => 0,
        };
        if buf.len() < offset + header_len {
            return Err(ChunkError::TooShort {
                expected: offset + header_len,
                actual: buf.len(),
            });
        }

        let has_prior = self.channels.get(&channel).is_some_and(|s| s.have_header);
        if form != HeaderForm::Full && !has_prior {
            return Err(ChunkError::NoPriorHeader(channel));
        }

        let state = self.channels.entry(channel).or_default();

        let mut declared_timestamp_field = state.timestamp;
        match form {
            HeaderForm::Full => {
                let ts = read_u24(&buf[offset..]);
                let size = read_u24(&buf[offset + 3..]);
                let mtype = buf[offset + 6];
                let stream_id = u32::from_le_bytes([
                    buf[offset + 7],
                    buf[offset + 8],
                    buf[offset + 9],
                    buf[offset + 10],
                ]);
                offset += 11;
                declared_timestamp_field = ts;
                state.size = size;
                state.message_type = mtype;
                state.stream_id = stream_id;
                state.delta = 0;
                state.partial.clear();
                state.have_header = true;
            }
            HeaderForm::Message => {
                let delta = read_u24(&buf[offset..]);
                let size = read_u24(&buf[offset + 3..]);
                let mtype = buf[offset + 6];
                offset += 7;
                declared_timestamp_field = delta;
                state.delta = delta;
                state.size = size;
                state.message_type = mtype;
                state.partial.clear();
            }
            HeaderForm::Time => {
                let delta = read_u24(&buf[offset..]);
                offset += 3;
                declared_timestamp_field = delta;
                state.delta = delta;
                state.partial.clear();
            }
            HeaderForm::Separator => {}
        }

        let mut extended = 0u32;
        if (form == HeaderForm::Full || form == HeaderForm::Message || form == HeaderForm::Time)
            && declared_timestamp_field == 0xFF_FFFF
        {
            if buf.len() < offset + 4 {
                return Err(ChunkError::TooShort {
                    expected: offset + 4,
                    actual: buf.len(),
                });
            }
            extended = u32::from_be_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            offset += 4;
        }

        match form {
            HeaderForm::Full => {
                state.timestamp = if declared_timestamp_field == 0xFF_FFFF {
                    extended
                } else {
                    declared_timestamp_field
                };
            }
            HeaderForm::Message | HeaderForm::Time => {
                let delta = if declared_timestamp_field == 0xFF_FFFF {
                    extended
                } else {
                    declared_timestamp_field
                };
                state.timestamp = state.timestamp.wrapping_add(delta);
            }
            HeaderForm::Separator => {}
        }

        let remaining_for_message = state.size as usize - state.partial.len();
        let take = remaining_for_message.min(self.chunk_size).min(buf.len() - offset);
        state.partial.extend_from_slice(&buf[offset..offset + take]);
        offset += take;

        self.total_bytes += take as u64;
        self.bytes_since_ack += take as u32;

        let message = if state.partial.len() == state.size as usize {
            Some(Message {
                channel,
                timestamp: state.timestamp,
                message_type: state.message_type,
                stream_id: state.stream_id,
                data: std::mem::take(&mut state.partial),
            })
        } else {
            None
        };

        Ok((offset, message))
    }

    /// Whether accumulated bytes since the last acknowledgement exceed the
    /// read window, per §4.1 "On every received chunk...".
    #[must_use]
    pub fn needs_ack(&self) -> bool {
        self.bytes_since_ack > self.window_size
    }

    /// Reset the ack accounting after an acknowledgement has been sent.
    pub fn ack_sent(&mut self) {
        self.bytes_since_ack = 0;
    }
}

fn parse_basic_header(buf: &[u8]) -> Result<(u32, HeaderForm, usize), ChunkError> {
    if buf.is_empty() {
        return Err(ChunkError::TooShort {
            expected: 1,
            actual: 0,
        });
    }
    let first = buf[0];
    let form = HeaderForm::from_bits(first >> 6);
    let low6 = first & 0x3f;
    match low6 {
        0 => {
            if buf.len() < 2 {
                return Err(ChunkError::TruncatedChannelId);
            }
            Ok((u32::from(buf[1]) + 64, form, 2))
        }
        1 => {
            if buf.len() < 3 {
                return Err(ChunkError::TruncatedChannelId);
            }
            let id = u32::from(buf[1]) + u32::from(buf[2]) * 256 + 64;
            Ok((id, form, 3))
        }
        n => Ok((u32::from(n), form, 1)),
    }
}

fn read_u24(buf: &[u8]) -> u32 {
    (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2])
}

fn write_u24(out: &mut Vec<u8>, value: u32) {
    out.push(((value >> 16) & 0xff) as u8);
    out.push(((value >> 8) & 0xff) as u8);
    out.push((value & 0xff) as u8);
}

fn write_basic_header(out: &mut Vec<u8>, channel: u32, form: HeaderForm) {
    let form_bits = form.bits() << 6;
    if channel < 64 {
        out.push(form_bits | channel as u8);
    } else if channel < 320 {
        out.push(form_bits);
        out.push((channel - 64) as u8);
    } else {
        out.push(form_bits | 1);
        let rel = channel - 64;
        out.push((rel & 0xff) as u8);
        out.push((rel >> 8) as u8);
    }
}

/// Per-channel state tracked by a writer so it emits the minimal header
/// form for each outgoing message (§4.1 "letting the sender encode the
/// minimum delta").
#[derive(Debug, Clone, Default)]
struct WriterChannelState {
    timestamp: u32,
    size: u32,
    message_type: u8,
    stream_id: u32,
    have_header: bool,
}

/// Splits outgoing [`Message`]s into chunks, choosing the cheapest header
/// form each time: FULL for the first message on a channel, TIME when
/// size and type repeat the previous message on that channel (the
/// compression invariant for monotonic same-shape media runs), MESSAGE
/// otherwise.
pub struct Disassembler {
    channels: HashMap<u32, WriterChannelState>,
    chunk_size: usize,
}

impl Disassembler {
    /// Create a disassembler with the given outgoing chunk size.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            channels: HashMap::new(),
            chunk_size,
        }
    }

    /// Change the outgoing chunk size (§4.2 `play` "raise the outbound
    /// chunk size").
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size;
    }

    /// Serialize `message` into one or more wire chunks.
    #[must_use]
    pub fn write(&mut self, message: &Message) -> Vec<u8> {
        let state = self.channels.entry(message.channel).or_default();
        let size = message.data.len() as u32;
        let form = if !state.have_header {
            HeaderForm::Full
        } else if state.size == size && state.message_type == message.message_type {
            HeaderForm::Time
        } else {
            HeaderForm::Message
        };

        let mut out = Vec::with_capacity(message.data.len() + 16);
        write_basic_header(&mut out, message.channel, form);

        let delta = message.timestamp.wrapping_sub(state.timestamp);
        let timestamp_field = match form {
            HeaderForm::Full => {
                if message.timestamp >= 0xFF_FFFF {
                    0xFF_FFFF
                } else {
                    message.timestamp
                }
            }
            _ => {
                if delta >= 0xFF_FFFF {
                    0xFF_FFFF
                } else {
                    delta
                }
            }
        };

        match form {
            HeaderForm::Full => {
                write_u24(&mut out, timestamp_field);
                write_u24(&mut out, size);
                out.push(message.message_type);
                out.extend_from_slice(&message.stream_id.to_le_bytes());
            }
            HeaderForm::Message => {
                write_u24(&mut out, timestamp_field);
                write_u24(&mut out, size);
                out.push(message.message_type);
            }
            HeaderForm::Time => {
                write_u24(&mut out, timestamp_field);
            }
            HeaderForm::Separator => unreachable!("writer never emits this form"),
        }
        let extended_value = if form == HeaderForm::Full {
            message.timestamp
        } else {
            delta
        };
        if timestamp_field == 0xFF_FFFF {
            out.extend_from_slice(&extended_value.to_be_bytes());
        }

        state.timestamp = message.timestamp;
        state.size = size;
        state.message_type = message.message_type;
        state.stream_id = message.stream_id;
        state.have_header = true;

        for chunk in message.data.chunks(self.chunk_size.max(1)) {
            out.extend_from_slice(chunk);
        }

        // Re-interleave continuation basic headers between chunk
        // boundaries past the first.
        reinsert_continuation_headers(out, message.channel, message.data.len(), self.chunk_size)
    }
}

/// Continuation chunks (everything after the first) repeat only the basic
/// header, with the top two bits forced to SEPARATOR and no message
/// header (§4.1: a chunk payload longer than chunk-size is split across
/// multiple wire chunks, each carrying its own basic header).
fn reinsert_continuation_headers(
    mut first_pass: Vec<u8>,
    channel: u32,
    data_len: usize,
    chunk_size: usize,
) -> Vec<u8> {
    if chunk_size == 0 || data_len <= chunk_size {
        return first_pass;
    }
    let header_len = first_pass.len() - data_len;
    let header: Vec<u8> = first_pass.drain(..header_len).collect();
    let payload = first_pass;

    let mut out = header;
    let mut continuation = Vec::new();
    write_basic_header(&mut continuation, channel, HeaderForm::Separator);

    for (i, chunk) in payload.chunks(chunk_size).enumerate() {
        if i > 0 {
            out.extend_from_slice(&continuation);
        }
        out.extend_from_slice(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_header_chunk(channel: u32, ts: u32, mtype: u8, stream_id: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_basic_header(&mut out, channel, HeaderForm::Full);
        write_u24(&mut out, ts);
        write_u24(&mut out, data.len() as u32);
        out.push(mtype);
        out.extend_from_slice(&stream_id.to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn reassembles_a_single_chunk_message() {
        let data = b"hello world";
        let raw = full_header_chunk(3, 1000, message_type::AUDIO, 1, data);
        let mut asm = Assembler::new(1_000_000);
        let (consumed, msg) = asm.feed(&raw).unwrap();
        assert_eq!(consumed, raw.len());
        let msg = msg.unwrap();
        assert_eq!(msg.timestamp, 1000);
        assert_eq!(msg.data, data);
        assert_eq!(msg.stream_id, 1);
    }

    #[test]
    fn message_header_accumulates_delta_against_prior_full_header() {
        let data = b"abc";
        let first = full_header_chunk(5, 100, message_type::AUDIO, 1, data);
        let mut asm = Assembler::new(1_000_000);
        asm.feed(&first).unwrap();

        let mut second = Vec::new();
        write_basic_header(&mut second, 5, HeaderForm::Message);
        write_u24(&mut second, 50);
        write_u24(&mut second, data.len() as u32);
        second.push(message_type::AUDIO);
        second.extend_from_slice(data);

        let (_, msg) = asm.feed(&second).unwrap();
        assert_eq!(msg.unwrap().timestamp, 150);
    }

    #[test]
    fn rejects_compressed_header_with_no_prior_full_header() {
        let mut buf = Vec::new();
        write_basic_header(&mut buf, 9, HeaderForm::Time);
        write_u24(&mut buf, 10);
        let mut asm = Assembler::new(1_000_000);
        assert!(matches!(
            asm.feed(&buf),
            Err(ChunkError::NoPriorHeader(9))
        ));
    }

    #[test]
    fn channel_id_wide_form_round_trips() {
        let mut out = Vec::new();
        write_basic_header(&mut out, 500, HeaderForm::Full);
        let (channel, form, len) = parse_basic_header(&out).unwrap();
        assert_eq!(channel, 500);
        assert_eq!(form, HeaderForm::Full);
        assert_eq!(len, 3);
    }

    #[test]
    fn extended_timestamp_is_honored() {
        let data = b"x";
        let mut raw = Vec::new();
        write_basic_header(&mut raw, 4, HeaderForm::Full);
        write_u24(&mut raw, 0xFF_FFFF);
        write_u24(&mut raw, data.len() as u32);
        raw.push(message_type::VIDEO);
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&5_000_000u32.to_be_bytes());
        raw.extend_from_slice(data);

        let mut asm = Assembler::new(1_000_000);
        let (_, msg) = asm.feed(&raw).unwrap();
        assert_eq!(msg.unwrap().timestamp, 5_000_000);
    }

    #[test]
    fn disassembler_splits_long_payload_across_chunk_size() {
        let mut dis = Disassembler::new(4);
        let msg = Message {
            channel: 3,
            timestamp: 0,
            message_type: message_type::AUDIO,
            stream_id: 1,
            data: b"0123456789".to_vec(),
        };
        let wire = dis.write(&msg);

        let mut asm = Assembler::new(1_000_000);
        let mut offset = 0;
        let mut got = None;
        while offset < wire.len() {
            let (consumed, maybe) = asm.feed(&wire[offset..]).unwrap();
            offset += consumed;
            if maybe.is_some() {
                got = maybe;
            }
        }
        assert_eq!(got.unwrap().data, msg.data);
    }

    #[test]
    fn same_shape_run_compresses_to_full_then_time_headers() {
        let mut dis = Disassembler::new(Assembler::DEFAULT_CHUNK_SIZE);
        let mut asm = Assembler::new(1_000_000);
        let mut last = None;
        for i in 0..5u32 {
            let msg = Message {
                channel: 6,
                timestamp: i * 40,
                message_type: message_type::AUDIO,
                stream_id: 1,
                data: vec![i as u8; 20],
            };
            let wire = dis.write(&msg);
            // Every message after the first must use the 3-byte TIME form:
            // basic header (1 byte, low6=6) + 3-byte delta, nothing else.
            if i == 0 {
                assert_eq!(wire[0] >> 6, 0b00);
            } else {
                assert_eq!(wire[0] >> 6, 0b10);
                assert_eq!(wire.len(), 1 + 3 + 20);
            }
            let (_, got) = asm.feed(&wire).unwrap();
            last = got;
        }
        assert_eq!(last.unwrap().timestamp, 160);
    }

    #[test]
    fn ack_threshold_is_tracked() {
        let data = vec![0u8; 10];
        let raw = full_header_chunk(3, 0, message_type::AUDIO, 1, &data);
        let mut asm = Assembler::new(5);
        asm.feed(&raw).unwrap();
        assert!(asm.needs_ack());
        asm.ack_sent();
        assert!(!asm.needs_ack());
    }
}
