//! # Gateway AMF
//!
//! The structured value codec used for streaming-protocol command bodies
//! (§4.2, §6.1): a dynamically typed object graph with string references
//! and typed object descriptors, consumed by the rest of the gateway as a
//! black box with two operations over a byte cursor - [`decode_value`] and
//! [`encode_value`].
//!
//! Two codec versions exist on the wire, selected per-connection by the
//! peer's advertised `objectEncoding` (§3, §4.2 `connect`): version `0`
//! (AMF0) and version `3` (AMF3, nested inside an AMF0 stream via marker
//! `0x11`). Both round-trip through the same [`Value`] type.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec0;
mod codec3;
mod cursor;
mod error;
mod value;

pub use cursor::Cursor;
pub use error::AmfError;
pub use value::{object_as_map, Value};

/// Codec versions the streaming protocol defines (§4.2 `connect` rejects
/// anything else).
pub const SUPPORTED_VERSIONS: [u8; 2] = [0, 3];

/// Decode exactly one value from `cur`, using AMF0 (version `0`) or AMF3
/// (version `3`) framing.
///
/// # Errors
///
/// Returns [`AmfError::UnsupportedVersion`] for any version other than 0
/// or 3, and the usual parse errors otherwise.
pub fn decode_value(cur: &mut Cursor<'_>, version: u8) -> Result<Value, AmfError> {
    match version {
        0 => codec0::Decoder::new().read(cur),
        3 => codec3::Decoder::new().read(cur),
        other => Err(AmfError::UnsupportedVersion(other)),
    }
}

/// Decode every value remaining in `cur` (a command message's trailing
/// argument list, per §4.2).
pub fn decode_all(cur: &mut Cursor<'_>, version: u8) -> Result<Vec<Value>, AmfError> {
    let mut values = Vec::new();
    while cur.remaining() > 0 {
        values.push(decode_value(cur, version)?);
    }
    Ok(values)
}

/// Encode one value with AMF0 (version `0`) or AMF3 (version `3`) framing,
/// appending to `out`.
///
/// # Errors
///
/// Returns [`AmfError::UnsupportedVersion`] for any version other than 0
/// or 3.
pub fn encode_value(out: &mut Vec<u8>, value: &Value, version: u8) -> Result<(), AmfError> {
    let mut w = cursor::Writer::new();
    match version {
        0 => codec0::write(&mut w, value),
        3 => codec3::Encoder::new().write(&mut w, value),
        other => return Err(AmfError::UnsupportedVersion(other)),
    }
    out.extend(w.into_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_version() {
        let bytes = [0u8];
        let mut cur = Cursor::new(&bytes);
        assert!(matches!(
            decode_value(&mut cur, 1),
            Err(AmfError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn decode_all_reads_a_command_argument_list() {
        let mut out = Vec::new();
        encode_value(&mut out, &Value::str("connect"), 0).unwrap();
        encode_value(&mut out, &Value::Number(1.0), 0).unwrap();
        encode_value(&mut out, &Value::Null, 0).unwrap();
        let mut cur = Cursor::new(&out);
        let values = decode_all(&mut cur, 0).unwrap();
        assert_eq!(values, vec![Value::str("connect"), Value::Number(1.0), Value::Null]);
    }
}
