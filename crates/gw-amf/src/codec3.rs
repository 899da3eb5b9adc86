//! AMF3 (structured value codec version 3), as nested inside an AMF0
//! stream via the `0x11` marker.
//!
//! Scope: integers, doubles, strings, dense/dynamic-object values - the
//! shapes command bodies actually use. Externalizable types and objects
//! with sealed (class-defined) members beyond a dynamic property list are
//! out of scope, matching how little of full AMF3 command bodies exercise.

use crate::cursor::{Cursor, Writer};
use crate::error::AmfError;
use crate::value::Value;

const UNDEFINED: u8 = 0x00;
const NULL: u8 = 0x01;
const FALSE: u8 = 0x02;
const TRUE: u8 = 0x03;
const INTEGER: u8 = 0x04;
const DOUBLE: u8 = 0x05;
const STRING: u8 = 0x06;
const DATE: u8 = 0x08;
const ARRAY: u8 = 0x09;
const OBJECT: u8 = 0x0A;

/// AMF3 decoder state: separate reference tables for strings and complex
/// objects, per §6.1's round-trip requirement for codec version 3.
#[derive(Default)]
pub struct Decoder {
    string_refs: Vec<String>,
    object_refs: Vec<Value>,
}

impl Decoder {
    /// New decoder with empty reference tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_string_value(&mut self, cur: &mut Cursor<'_>) -> Result<String, AmfError> {
        let header = cur.read_u29()?;
        if header & 1 == 0 {
            let idx = (header >> 1) as usize;
            return self
                .string_refs
                .get(idx)
                .cloned()
                .ok_or(AmfError::DanglingReference(idx as u32));
        }
        let len = (header >> 1) as usize;
        let s = cur.read_utf8(len)?;
        if !s.is_empty() {
            self.string_refs.push(s.clone());
        }
        Ok(s)
    }

    /// Decode exactly one AMF3 value.
    pub fn read(&mut self, cur: &mut Cursor<'_>) -> Result<Value, AmfError> {
        let marker = cur.read_u8()?;
        match marker {
            UNDEFINED => Ok(Value::Undefined),
            NULL => Ok(Value::Null),
            FALSE => Ok(Value::Boolean(false)),
            TRUE => Ok(Value::Boolean(true)),
            INTEGER => {
                let raw = cur.read_u29()?;
                // U29 is unsigned on the wire; AMF3 integers are a signed
                // 29-bit two's-complement value.
                let signed = if raw & 0x1000_0000 != 0 {
                    raw as i32 - (1 << 29)
                } else {
                    raw as i32
                };
                Ok(Value::Number(f64::from(signed)))
            }
            DOUBLE => Ok(Value::Number(cur.read_f64()?)),
            STRING => Ok(Value::String(self.read_string_value(cur)?)),
            DATE => {
                let header = cur.read_u29()?;
                if header & 1 == 0 {
                    let idx = (header >> 1) as usize;
                    return self
                        .object_refs
                        .get(idx)
                        .cloned()
                        .ok_or(AmfError::DanglingReference(idx as u32));
                }
                let millis = cur.read_f64()?;
                let value = Value::Date(millis);
                self.object_refs.push(value.clone());
                Ok(value)
            }
            ARRAY => {
                let header = cur.read_u29()?;
                if header & 1 == 0 {
                    let idx = (header >> 1) as usize;
                    return self
                        .object_refs
                        .get(idx)
                        .cloned()
                        .ok_or(AmfError::DanglingReference(idx as u32));
                }
                let dense_len = (header >> 1) as usize;
                // Associative (string-keyed) portion, terminated by "".
                let mut assoc = Vec::new();
                loop {
                    let key = self.read_string_value(cur)?;
                    if key.is_empty() {
                        break;
                    }
                    assoc.push((key, self.read(cur)?));
                }
                let mut dense = Vec::with_capacity(dense_len);
                for _ in 0..dense_len {
                    dense.push(self.read(cur)?);
                }
                let value = if assoc.is_empty() {
                    Value::Array(dense)
                } else {
                    // Mixed dense+associative: fold the dense part in under
                    // numeric keys so ordering survives.
                    let mut pairs = assoc;
                    for (i, v) in dense.into_iter().enumerate() {
                        pairs.push((i.to_string(), v));
                    }
                    Value::MixedArray(pairs)
                };
                self.object_refs.push(value.clone());
                Ok(value)
            }
            OBJECT => {
                let header = cur.read_u29()?;
                if header & 1 == 0 {
                    let idx = (header >> 1) as usize;
                    return self
                        .object_refs
                        .get(idx)
                        .cloned()
                        .ok_or(AmfError::DanglingReference(idx as u32));
                }
                // Only the common "dynamic, non-externalizable, no sealed
                // members" trait shape (header == 0x0B) is decoded; that is
                // what every command body observed in practice uses.
                if header != 0x0B {
                    tracing::warn!(header, "amf3 object with unsupported trait shape");
                }
                let _class_name = self.read_string_value(cur)?;
                let mut pairs = Vec::new();
                loop {
                    let key = self.read_string_value(cur)?;
                    if key.is_empty() {
                        break;
                    }
                    pairs.push((key, self.read(cur)?));
                }
                let value = Value::Object(pairs);
                self.object_refs.push(value.clone());
                Ok(value)
            }
            other => Err(AmfError::UnsupportedMarker(other)),
        }
    }
}

/// AMF3 encoder state, mirroring [`Decoder`]'s reference tables.
#[derive(Default)]
pub struct Encoder {
    string_refs: Vec<String>,
}

impl Encoder {
    /// New encoder with empty reference tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write_string_value(&mut self, w: &mut Writer, s: &str) {
        if let Some(idx) = self.string_refs.iter().position(|r| r == s) {
            if !s.is_empty() {
                w.write_u29((idx as u32) << 1);
                return;
            }
        }
        w.write_u29(((s.len() as u32) << 1) | 1);
        w.write_utf8(s);
        if !s.is_empty() {
            self.string_refs.push(s.to_string());
        }
    }

    /// Encode one value in AMF3.
    pub fn write(&mut self, w: &mut Writer, value: &Value) {
        match value {
            Value::Undefined => w.write_u8(UNDEFINED),
            Value::Null => w.write_u8(NULL),
            Value::Boolean(false) => w.write_u8(FALSE),
            Value::Boolean(true) => w.write_u8(TRUE),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < f64::from(1i32 << 28) {
                    w.write_u8(INTEGER);
                    let signed = *n as i32;
                    let raw = (signed as u32) & 0x1fff_ffff;
                    w.write_u29(raw);
                } else {
                    w.write_u8(DOUBLE);
                    w.write_f64(*n);
                }
            }
            Value::String(s) => {
                w.write_u8(STRING);
                self.write_string_value(w, s);
            }
            Value::Date(millis) => {
                w.write_u8(DATE);
                w.write_u29(1);
                w.write_f64(*millis);
            }
            Value::Array(items) => {
                w.write_u8(ARRAY);
                w.write_u29(((items.len() as u32) << 1) | 1);
                w.write_u8(0x01); // empty associative key terminator
                for item in items {
                    self.write(w, item);
                }
            }
            Value::MixedArray(pairs) => {
                w.write_u8(ARRAY);
                w.write_u29(1); // no dense portion
                for (k, v) in pairs {
                    self.write_string_value(w, k);
                    self.write(w, v);
                }
                w.write_u8(0x01);
            }
            Value::Object(pairs) => {
                w.write_u8(OBJECT);
                w.write_u29(0x0B); // dynamic, non-externalizable, no sealed members
                self.write_string_value(w, ""); // anonymous class name
                for (k, v) in pairs {
                    self.write_string_value(w, k);
                    self.write(w, v);
                }
                w.write_u8(0x01);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) -> Value {
        let mut w = Writer::new();
        Encoder::new().write(&mut w, &v);
        let bytes = w.into_bytes();
        let mut cur = Cursor::new(&bytes);
        Decoder::new().read(&mut cur).unwrap()
    }

    #[test]
    fn integer_round_trips() {
        assert_eq!(round_trip(Value::Number(7.0)), Value::Number(7.0));
    }

    #[test]
    fn negative_integer_round_trips() {
        assert_eq!(round_trip(Value::Number(-12.0)), Value::Number(-12.0));
    }

    #[test]
    fn string_round_trips() {
        assert_eq!(round_trip(Value::str("speex")), Value::str("speex"));
    }

    #[test]
    fn dynamic_object_round_trips() {
        let obj = Value::object([("rate".to_string(), Value::Number(16000.0))]);
        assert_eq!(round_trip(obj.clone()), obj);
    }
}
