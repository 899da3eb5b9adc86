//! Command codec: decoding and encoding the `(name, id, body, args…)`
//! tuples carried on stream id 0 (§4.2).

use gw_amf::{Cursor, Value};

use crate::error::{CommandError, Error};

/// A decoded command message.
#[derive(Debug, Clone)]
pub struct Command {
    /// Command name, e.g. `"connect"`, `"publish"`.
    pub name: String,
    /// Transaction id echoed back in the response.
    pub id: f64,
    /// Command body (usually an object, sometimes `Value::Null`).
    pub body: Value,
    /// Trailing positional arguments.
    pub args: Vec<Value>,
    /// The stream id this command message was framed on (always `0` right
    /// after [`decode`]; filled in by the caller from the chunk header,
    /// since that id lives outside the AMF payload).
    pub stream_id: u32,
}

/// Well-known command names the core dispatches directly (§4.2); anything
/// else falls through to the application's command handler.
pub mod name {
    pub const CONNECT: &str = "connect";
    pub const CREATE_STREAM: &str = "createStream";
    pub const CLOSE_STREAM: &str = "closeStream";
    pub const PUBLISH: &str = "publish";
    pub const PLAY: &str = "play";
    pub const PAUSE: &str = "pause";
    pub const SEEK: &str = "seek";
    pub const RESULT: &str = "_result";
    pub const ERROR: &str = "_error";
    pub const ON_STATUS: &str = "onStatus";
}

/// Decode a command message body (the payload of a `COMMAND_AMF0` or
/// `COMMAND_AMF3` message) using the connection's negotiated codec
/// version.
///
/// # Errors
///
/// Propagates structured-value decode failures.
pub fn decode(data: &[u8], version: u8) -> Result<Command, Error> {
    let mut cur = Cursor::new(data);
    let name = gw_amf::decode_value(&mut cur, version)?;
    let id = gw_amf::decode_value(&mut cur, version)?;
    let body = gw_amf::decode_value(&mut cur, version)?;
    let mut args = Vec::new();
    while cur.remaining() > 0 {
        args.push(gw_amf::decode_value(&mut cur, version)?);
    }
    Ok(Command {
        name: name.as_str().unwrap_or_default().to_string(),
        id: id.as_f64().unwrap_or(0.0),
        body,
        args,
        stream_id: 0,
    })
}

/// Encode `(name, id, body, args…)` into a command message payload.
///
/// # Errors
///
/// Propagates structured-value encode failures (only on an unsupported
/// `version`; practically infallible for 0 and 3).
pub fn encode(
    out: &mut Vec<u8>,
    name: &str,
    id: f64,
    body: &Value,
    args: &[Value],
    version: u8,
) -> Result<(), Error> {
    gw_amf::encode_value(out, &Value::str(name), version)?;
    gw_amf::encode_value(out, &Value::Number(id), version)?;
    gw_amf::encode_value(out, body, version)?;
    for arg in args {
        gw_amf::encode_value(out, arg, version)?;
    }
    Ok(())
}

/// Build a status object, e.g. `{level: "status", code:
/// "NetConnection.Connect.Success", description: "..."}` (§4.2).
#[must_use]
pub fn status_object(level: &str, code: &str, description: &str) -> Value {
    Value::Object(vec![
        ("level".to_string(), Value::str(level)),
        ("code".to_string(), Value::str(code)),
        ("description".to_string(), Value::str(description)),
    ])
}

/// Validate the codec version a `connect` command advertised via its body's
/// `objectEncoding` attribute (default `0` when absent).
///
/// # Errors
///
/// Returns [`CommandError::UnsupportedObjectEncoding`] if the advertised
/// version is not one this implementation speaks (§4.2).
pub fn negotiate_object_encoding(body: &Value) -> Result<u8, CommandError> {
    let encoding = body
        .get("objectEncoding")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if !gw_amf::SUPPORTED_VERSIONS.contains(&(encoding as u8)) || encoding.fract() != 0.0 {
        return Err(CommandError::UnsupportedObjectEncoding(encoding));
    }
    Ok(encoding as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_connect_command() {
        let body = Value::Object(vec![("app".to_string(), Value::str("live"))]);
        let mut out = Vec::new();
        encode(&mut out, name::CONNECT, 1.0, &body, &[], 0).unwrap();
        let decoded = decode(&out, 0).unwrap();
        assert_eq!(decoded.name, "connect");
        assert_eq!(decoded.id, 1.0);
        assert_eq!(decoded.body.get("app").and_then(Value::as_str), Some("live"));
    }

    #[test]
    fn negotiates_default_and_rejects_unknown_encoding() {
        let default_body = Value::Object(vec![("app".to_string(), Value::str("live"))]);
        assert_eq!(negotiate_object_encoding(&default_body).unwrap(), 0);

        let bad_body = Value::Object(vec![("objectEncoding".to_string(), Value::Number(7.0))]);
        assert!(matches!(
            negotiate_object_encoding(&bad_body),
            Err(CommandError::UnsupportedObjectEncoding(v)) if (v - 7.0).abs() < f64::EPSILON
        ));
    }
}
