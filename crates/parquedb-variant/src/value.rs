//! The Variant value model and its JSON bridge

use base64::Engine as _;

/// Milliseconds either side of the epoch that a `Date` may span. Matches the
/// ECMAScript time value range so dates survive a JSON round-trip through
/// clients.
pub(crate) const MAX_DATE_MS: i64 = 8_640_000_000_000_000;

pub(crate) fn date_in_range(ms: i64) -> bool {
    (-MAX_DATE_MS..=MAX_DATE_MS).contains(&ms)
}

/// A self-describing value.
///
/// Objects preserve field insertion order; re-encoding a decoded object
/// reproduces the original byte sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Sign-magnitude big integer. The magnitude is big-endian with no
    /// leading zero bytes; zero is `{ negative: false, magnitude: [] }`.
    BigInt {
        negative: bool,
        magnitude: Vec<u8>,
    },
    String(String),
    Binary(Vec<u8>),
    /// Milliseconds since the Unix epoch, UTC.
    Date(i64),
    Array(Vec<Variant>),
    Object(Vec<(String, Variant)>),
}

impl Variant {
    /// Field lookup on an object; `None` for other shapes.
    pub fn get(&self, key: &str) -> Option<&Variant> {
        match self {
            Variant::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Variant::Object(_))
    }

    /// Convert a JSON value. Integers that fit i64 become `Int`, larger u64s
    /// become `BigInt`, all other numbers become `Float`.
    pub fn from_json(value: &serde_json::Value) -> Variant {
        match value {
            serde_json::Value::Null => Variant::Null,
            serde_json::Value::Bool(b) => Variant::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Variant::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Variant::BigInt {
                        negative: false,
                        magnitude: strip_leading_zeros(&u.to_be_bytes()),
                    }
                } else {
                    // serde_json numbers are always finite
                    Variant::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Variant::String(s.clone()),
            serde_json::Value::Array(items) => {
                Variant::Array(items.iter().map(Variant::from_json).collect())
            }
            serde_json::Value::Object(fields) => Variant::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Variant::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back to JSON. Values that only arise from typed callers map to
    /// JSON stand-ins: `Date` to its millisecond number, `Binary` to base64,
    /// `BigInt` to a decimal string.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Variant::Null => serde_json::Value::Null,
            Variant::Bool(b) => serde_json::Value::Bool(*b),
            Variant::Int(i) => serde_json::Value::from(*i),
            Variant::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Variant::BigInt {
                negative,
                magnitude,
            } => serde_json::Value::String(bigint_to_decimal(*negative, magnitude)),
            Variant::String(s) => serde_json::Value::String(s.clone()),
            Variant::Binary(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Variant::Date(ms) => serde_json::Value::from(*ms),
            Variant::Array(items) => {
                serde_json::Value::Array(items.iter().map(Variant::to_json).collect())
            }
            Variant::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn bigint_to_decimal(negative: bool, magnitude: &[u8]) -> String {
    if magnitude.is_empty() {
        return "0".to_string();
    }
    // Repeated division by 10 over the big-endian magnitude.
    let mut digits = Vec::new();
    let mut work = magnitude.to_vec();
    while work.iter().any(|b| *b != 0) {
        let mut rem: u32 = 0;
        for byte in work.iter_mut() {
            let cur = (rem << 8) | u32::from(*byte);
            *byte = (cur / 10) as u8;
            rem = cur % 10;
        }
        digits.push(b'0' + rem as u8);
    }
    if digits.is_empty() {
        digits.push(b'0');
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_field_order() {
        let v = json!({"zebra": 1, "apple": 2, "mango": [true, null]});
        let variant = Variant::from_json(&v);
        assert_eq!(variant.to_json(), v);
        if let Variant::Object(fields) = &variant {
            let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, ["zebra", "apple", "mango"]);
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn large_u64_becomes_bigint() {
        let v = json!(u64::MAX);
        let variant = Variant::from_json(&v);
        assert_eq!(
            variant,
            Variant::BigInt {
                negative: false,
                magnitude: vec![0xff; 8],
            }
        );
        assert_eq!(variant.to_json(), json!("18446744073709551615"));
    }

    #[test]
    fn bigint_zero_renders_as_zero() {
        let v = Variant::BigInt {
            negative: false,
            magnitude: vec![],
        };
        assert_eq!(v.to_json(), json!("0"));
    }

    #[test]
    fn object_get() {
        let v = Variant::from_json(&json!({"a": 1}));
        assert_eq!(v.get("a"), Some(&Variant::Int(1)));
        assert_eq!(v.get("b"), None);
    }
}
