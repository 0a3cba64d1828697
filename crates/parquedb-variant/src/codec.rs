//! Binary encoding and decoding
//!
//! Wire layout: a 2-byte header (magic `0x56`, version `0x01`) followed by a
//! single tagged value. Nested values are tag + body without the header.
//! Lengths and counts are unsigned LEB128 varints; multi-byte scalars are
//! big-endian. Integers always use the smallest width that fits, which makes
//! encoding canonical: re-encoding any decoded value is byte-identical.

use crate::error::{DecodeError, EncodeError};
use crate::value::{date_in_range, strip_leading_zeros, Variant};

pub const MAGIC: u8 = 0x56;
pub const VERSION: u8 = 0x01;

const TAG_NULL: u8 = 0x00;
const TAG_TRUE: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_INT8: u8 = 0x03;
const TAG_INT16: u8 = 0x04;
const TAG_INT32: u8 = 0x05;
const TAG_INT64: u8 = 0x06;
const TAG_FLOAT64: u8 = 0x07;
const TAG_BIGINT: u8 = 0x08;
const TAG_STRING: u8 = 0x09;
const TAG_BINARY: u8 = 0x0a;
const TAG_DATE: u8 = 0x0b;
const TAG_ARRAY: u8 = 0x0c;
const TAG_OBJECT: u8 = 0x0d;

/// Encode a value with the 2-byte header.
pub fn encode(value: &Variant) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(16);
    out.push(MAGIC);
    out.push(VERSION);
    encode_value(value, &mut out)?;
    Ok(out)
}

/// Decode a headered value, consuming the entire input.
pub fn decode(bytes: &[u8]) -> Result<Variant, DecodeError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let magic = cursor.byte()?;
    if magic != MAGIC {
        return Err(DecodeError::WrongMagic(magic));
    }
    let version = cursor.byte()?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let value = decode_value(&mut cursor)?;
    if cursor.pos != cursor.bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

fn encode_value(value: &Variant, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    match value {
        Variant::Null => out.push(TAG_NULL),
        Variant::Bool(true) => out.push(TAG_TRUE),
        Variant::Bool(false) => out.push(TAG_FALSE),
        Variant::Int(n) => encode_int(*n, out),
        Variant::Float(f) => {
            if !f.is_finite() {
                return Err(EncodeError::NonFinite);
            }
            out.push(TAG_FLOAT64);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Variant::BigInt {
            negative,
            magnitude,
        } => {
            out.push(TAG_BIGINT);
            let magnitude = strip_leading_zeros(magnitude);
            // Canonical zero is positive
            let negative = *negative && !magnitude.is_empty();
            out.push(u8::from(negative));
            write_varint(magnitude.len() as u64, out);
            out.extend_from_slice(&magnitude);
        }
        Variant::String(s) => {
            out.push(TAG_STRING);
            write_varint(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Variant::Binary(b) => {
            out.push(TAG_BINARY);
            write_varint(b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Variant::Date(ms) => {
            if !date_in_range(*ms) {
                return Err(EncodeError::InvalidDate { ms: *ms });
            }
            out.push(TAG_DATE);
            out.extend_from_slice(&ms.to_be_bytes());
        }
        Variant::Array(items) => {
            out.push(TAG_ARRAY);
            write_varint(items.len() as u64, out);
            for item in items {
                encode_value(item, out)?;
            }
        }
        Variant::Object(fields) => {
            out.push(TAG_OBJECT);
            write_varint(fields.len() as u64, out);
            for (key, val) in fields {
                write_varint(key.len() as u64, out);
                out.extend_from_slice(key.as_bytes());
                encode_value(val, out)?;
            }
        }
    }
    Ok(())
}

fn encode_int(n: i64, out: &mut Vec<u8>) {
    if let Ok(v) = i8::try_from(n) {
        out.push(TAG_INT8);
        out.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i16::try_from(n) {
        out.push(TAG_INT16);
        out.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i32::try_from(n) {
        out.push(TAG_INT32);
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        out.push(TAG_INT64);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.byte()?;
            if shift >= 64 {
                return Err(DecodeError::InvalidValue("varint overflows u64"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn decode_value(cursor: &mut Cursor<'_>) -> Result<Variant, DecodeError> {
    let tag = cursor.byte()?;
    match tag {
        TAG_NULL => Ok(Variant::Null),
        TAG_TRUE => Ok(Variant::Bool(true)),
        TAG_FALSE => Ok(Variant::Bool(false)),
        TAG_INT8 => {
            let b = cursor.take(1)?;
            Ok(Variant::Int(i64::from(b[0] as i8)))
        }
        TAG_INT16 => {
            let b = cursor.take(2)?;
            Ok(Variant::Int(i64::from(i16::from_be_bytes([b[0], b[1]]))))
        }
        TAG_INT32 => {
            let b = cursor.take(4)?;
            Ok(Variant::Int(i64::from(i32::from_be_bytes([
                b[0], b[1], b[2], b[3],
            ]))))
        }
        TAG_INT64 => {
            let b = cursor.take(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            Ok(Variant::Int(i64::from_be_bytes(buf)))
        }
        TAG_FLOAT64 => {
            let b = cursor.take(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            Ok(Variant::Float(f64::from_be_bytes(buf)))
        }
        TAG_BIGINT => {
            let sign = cursor.byte()?;
            let negative = match sign {
                0 => false,
                1 => true,
                _ => return Err(DecodeError::InvalidValue("bigint sign byte")),
            };
            let len = usize::try_from(cursor.varint()?)
                .map_err(|_| DecodeError::InvalidValue("bigint length"))?;
            let magnitude = cursor.take(len)?.to_vec();
            if magnitude.first() == Some(&0) {
                return Err(DecodeError::InvalidValue("bigint leading zero"));
            }
            if negative && magnitude.is_empty() {
                return Err(DecodeError::InvalidValue("negative zero bigint"));
            }
            Ok(Variant::BigInt {
                negative,
                magnitude,
            })
        }
        TAG_STRING => {
            let len = usize::try_from(cursor.varint()?)
                .map_err(|_| DecodeError::InvalidValue("string length"))?;
            let bytes = cursor.take(len)?;
            let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
            Ok(Variant::String(s.to_string()))
        }
        TAG_BINARY => {
            let len = usize::try_from(cursor.varint()?)
                .map_err(|_| DecodeError::InvalidValue("binary length"))?;
            Ok(Variant::Binary(cursor.take(len)?.to_vec()))
        }
        TAG_DATE => {
            let b = cursor.take(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            let ms = i64::from_be_bytes(buf);
            if !date_in_range(ms) {
                return Err(DecodeError::InvalidValue("date out of range"));
            }
            Ok(Variant::Date(ms))
        }
        TAG_ARRAY => {
            let count = cursor.varint()?;
            let mut items = Vec::with_capacity(clamp_capacity(count));
            for _ in 0..count {
                items.push(decode_value(cursor)?);
            }
            Ok(Variant::Array(items))
        }
        TAG_OBJECT => {
            let count = cursor.varint()?;
            let mut fields = Vec::with_capacity(clamp_capacity(count));
            for _ in 0..count {
                let key_len = usize::try_from(cursor.varint()?)
                    .map_err(|_| DecodeError::InvalidValue("key length"))?;
                let key_bytes = cursor.take(key_len)?;
                let key = std::str::from_utf8(key_bytes)
                    .map_err(|_| DecodeError::InvalidUtf8)?
                    .to_string();
                fields.push((key, decode_value(cursor)?));
            }
            Ok(Variant::Object(fields))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

// Attacker-supplied counts must not drive allocation before the bytes exist.
fn clamp_capacity(count: u64) -> usize {
    usize::try_from(count.min(4096)).unwrap_or(4096)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Variant) {
        let bytes = encode(&value).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
        // Canonical form: re-encode is byte-identical
        assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn round_trips_scalars() {
        round_trip(Variant::Null);
        round_trip(Variant::Bool(true));
        round_trip(Variant::Bool(false));
        round_trip(Variant::Int(0));
        round_trip(Variant::Int(-1));
        round_trip(Variant::Int(127));
        round_trip(Variant::Int(128));
        round_trip(Variant::Int(-32_768));
        round_trip(Variant::Int(1 << 40));
        round_trip(Variant::Float(3.25));
        round_trip(Variant::Float(-0.0));
        round_trip(Variant::String("héllo".to_string()));
        round_trip(Variant::String(String::new()));
        round_trip(Variant::Binary(vec![0, 1, 2, 255]));
        round_trip(Variant::Date(1_736_938_800_000));
        round_trip(Variant::Date(-1));
    }

    #[test]
    fn round_trips_bigint() {
        round_trip(Variant::BigInt {
            negative: false,
            magnitude: vec![],
        });
        round_trip(Variant::BigInt {
            negative: true,
            magnitude: vec![1, 0, 0],
        });
        round_trip(Variant::BigInt {
            negative: false,
            magnitude: vec![0xff; 16],
        });
    }

    #[test]
    fn round_trips_containers() {
        round_trip(Variant::Array(vec![]));
        round_trip(Variant::Array(vec![
            Variant::Int(1),
            Variant::Null,
            Variant::String("x".into()),
        ]));
        round_trip(Variant::from_json(&json!({
            "zebra": {"nested": [1, 2.5, null]},
            "apple": "first",
        })));
    }

    #[test]
    fn integers_use_smallest_width() {
        // header(2) + tag(1) + body
        assert_eq!(encode(&Variant::Int(5)).unwrap().len(), 4);
        assert_eq!(encode(&Variant::Int(300)).unwrap().len(), 5);
        assert_eq!(encode(&Variant::Int(70_000)).unwrap().len(), 7);
        assert_eq!(encode(&Variant::Int(1 << 40)).unwrap().len(), 11);
    }

    #[test]
    fn header_bytes_are_fixed() {
        let bytes = encode(&Variant::Null).unwrap();
        assert_eq!(bytes, vec![0x56, 0x01, 0x00]);
    }

    #[test]
    fn encode_rejects_nan_and_bad_dates() {
        assert_eq!(
            encode(&Variant::Float(f64::NAN)),
            Err(EncodeError::NonFinite)
        );
        assert_eq!(
            encode(&Variant::Array(vec![Variant::Float(f64::NEG_INFINITY)])),
            Err(EncodeError::NonFinite)
        );
        assert!(matches!(
            encode(&Variant::Date(i64::MAX)),
            Err(EncodeError::InvalidDate { .. })
        ));
    }

    #[test]
    fn decode_rejects_wrong_magic() {
        assert_eq!(decode(&[0x57, 0x01, 0x00]), Err(DecodeError::WrongMagic(0x57)));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        assert_eq!(
            decode(&[0x56, 0x02, 0x00]),
            Err(DecodeError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn decode_rejects_truncation() {
        let full = encode(&Variant::String("hello".into())).unwrap();
        for cut in 0..full.len() {
            let err = decode(&full[..cut]).unwrap_err();
            assert_eq!(err, DecodeError::Truncated, "cut at {cut}");
        }
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert_eq!(decode(&[0x56, 0x01, 0x7f]), Err(DecodeError::UnknownTag(0x7f)));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(&Variant::Null).unwrap();
        bytes.push(0x00);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn non_canonical_bigint_is_rejected() {
        // sign 0, length 2, magnitude [0x00, 0x01] has a leading zero
        let bytes = vec![0x56, 0x01, 0x08, 0x00, 0x02, 0x00, 0x01];
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::InvalidValue("bigint leading zero"))
        );
    }

    #[test]
    fn object_field_order_survives_round_trip() {
        let v = Variant::Object(vec![
            ("z".to_string(), Variant::Int(1)),
            ("a".to_string(), Variant::Int(2)),
        ]);
        let decoded = decode(&encode(&v).unwrap()).unwrap();
        assert_eq!(decoded, v);
    }
}
