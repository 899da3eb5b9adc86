//! AMF0 (structured value codec version 0).

use crate::cursor::{Cursor, Writer};
use crate::error::AmfError;
use crate::value::Value;

const NUMBER: u8 = 0x00;
const BOOLEAN: u8 = 0x01;
const STRING: u8 = 0x02;
const OBJECT: u8 = 0x03;
const NULL: u8 = 0x05;
const UNDEFINED: u8 = 0x06;
const REFERENCE: u8 = 0x07;
const MIXED_ARRAY: u8 = 0x08;
const OBJECT_END: u8 = 0x09;
const ARRAY: u8 = 0x0A;
const DATE: u8 = 0x0B;
const LONG_STRING: u8 = 0x0C;
const XML_DOCUMENT: u8 = 0x0F;
const TYPED_OBJECT: u8 = 0x10;
const AMF3_MARKER: u8 = 0x11;

/// Decoder state: AMF0 keeps one reference table of previously emitted
/// complex values (objects/arrays), indexed in creation order.
#[derive(Default)]
pub struct Decoder {
    obj_refs: Vec<Value>,
}

impl Decoder {
    /// New decoder with an empty reference table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&mut self, v: Value) -> Value {
        self.obj_refs.push(v.clone());
        v
    }

    /// Decode exactly one value, advancing the cursor past it.
    pub fn read(&mut self, cur: &mut Cursor<'_>) -> Result<Value, AmfError> {
        let marker = cur.read_u8()?;
        match marker {
            NUMBER => Ok(Value::Number(cur.read_f64()?)),
            BOOLEAN => Ok(Value::Boolean(cur.read_u8()? != 0)),
            STRING => {
                let len = cur.read_u16()? as usize;
                Ok(Value::String(cur.read_utf8(len)?))
            }
            LONG_STRING | XML_DOCUMENT => {
                let len = cur.read_u32()? as usize;
                Ok(Value::String(cur.read_utf8(len)?))
            }
            NULL => Ok(Value::Null),
            UNDEFINED => Ok(Value::Undefined),
            REFERENCE => {
                let idx = cur.read_u16()? as usize;
                self.obj_refs
                    .get(idx)
                    .cloned()
                    .ok_or(AmfError::DanglingReference(idx as u32))
            }
            OBJECT => {
                let pairs = self.read_object_body(cur)?;
                Ok(self.remember(Value::Object(pairs)))
            }
            TYPED_OBJECT => {
                let class_len = cur.read_u16()? as usize;
                let _classname = cur.read_utf8(class_len)?;
                let pairs = self.read_object_body(cur)?;
                Ok(self.remember(Value::Object(pairs)))
            }
            MIXED_ARRAY => {
                let _approx_len = cur.read_u32()?;
                let pairs = self.read_object_body(cur)?;
                Ok(self.remember(Value::MixedArray(pairs)))
            }
            ARRAY => {
                let count = cur.read_u32()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read(cur)?);
                }
                Ok(self.remember(Value::Array(items)))
            }
            DATE => {
                let millis = cur.read_f64()?;
                let _timezone = cur.read_u16()?; // always 0 on the wire
                Ok(Value::Date(millis))
            }
            AMF3_MARKER => crate::codec3::Decoder::new().read(cur),
            other => Err(AmfError::UnsupportedMarker(other)),
        }
    }

    fn read_object_body(&mut self, cur: &mut Cursor<'_>) -> Result<Vec<(String, Value)>, AmfError> {
        let mut pairs = Vec::new();
        loop {
            let name_len = cur.read_u16()? as usize;
            let name = cur.read_utf8(name_len)?;
            if name.is_empty() && cur.peek_u8() == Some(OBJECT_END) {
                cur.read_u8()?; // consume the terminator
                break;
            }
            let value = self.read(cur)?;
            pairs.push((name, value));
        }
        Ok(pairs)
    }
}

/// Encode one value in AMF0, appending to `w`.
///
/// Object/array reference compression is intentionally not emitted on the
/// encode side - a fresh reference table per encoded value is simpler and
/// still round-trips through [`Decoder`], it just never uses [`REFERENCE`]
/// itself.
pub fn write(w: &mut Writer, value: &Value) {
    match value {
        Value::Number(n) => {
            w.write_u8(NUMBER);
            w.write_f64(*n);
        }
        Value::Boolean(b) => {
            w.write_u8(BOOLEAN);
            w.write_u8(u8::from(*b));
        }
        Value::String(s) => {
            if s.len() <= u16::MAX as usize {
                w.write_u8(STRING);
                w.write_u16(s.len() as u16);
            } else {
                w.write_u8(LONG_STRING);
                w.write_u32(s.len() as u32);
            }
            w.write_utf8(s);
        }
        Value::Null => w.write_u8(NULL),
        Value::Undefined => w.write_u8(UNDEFINED),
        Value::Object(pairs) => {
            w.write_u8(OBJECT);
            write_object_body(w, pairs);
        }
        Value::MixedArray(pairs) => {
            w.write_u8(MIXED_ARRAY);
            w.write_u32(pairs.len() as u32);
            write_object_body(w, pairs);
        }
        Value::Array(items) => {
            w.write_u8(ARRAY);
            w.write_u32(items.len() as u32);
            for item in items {
                write(w, item);
            }
        }
        Value::Date(millis) => {
            w.write_u8(DATE);
            w.write_f64(*millis);
            w.write_u16(0);
        }
    }
}

fn write_object_body(w: &mut Writer, pairs: &[(String, Value)]) {
    for (key, value) in pairs {
        w.write_u16(key.len() as u16);
        w.write_utf8(key);
        write(w, value);
    }
    w.write_u16(0);
    w.write_u8(OBJECT_END);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) -> Value {
        let mut w = Writer::new();
        write(&mut w, &v);
        let bytes = w.into_bytes();
        let mut cur = Cursor::new(&bytes);
        Decoder::new().read(&mut cur).unwrap()
    }

    #[test]
    fn number_round_trips() {
        assert_eq!(round_trip(Value::Number(42.5)), Value::Number(42.5));
    }

    #[test]
    fn string_round_trips() {
        assert_eq!(round_trip(Value::str("live")), Value::str("live"));
    }

    #[test]
    fn object_preserves_property_order() {
        let obj = Value::object([
            ("app".to_string(), Value::str("live")),
            ("type".to_string(), Value::str("nonprivate")),
        ]);
        let decoded = round_trip(obj.clone());
        assert_eq!(decoded, obj);
    }

    #[test]
    fn nested_array_round_trips() {
        let arr = Value::Array(vec![Value::Number(1.0), Value::str("x"), Value::Null]);
        assert_eq!(round_trip(arr.clone()), arr);
    }

    #[test]
    fn connect_command_body_shape() {
        let body = Value::object([
            ("app".to_string(), Value::str("live")),
            ("objectEncoding".to_string(), Value::Number(0.0)),
        ]);
        let decoded = round_trip(body);
        assert_eq!(decoded.get("app").and_then(Value::as_str), Some("live"));
    }
}
