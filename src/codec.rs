//! Structured value codec: serializes arbitrary structured values (scalars,
//! strings, arrays, dictionaries, typed binary, dates, special scalars) into
//! the self-describing `PQCV` byte stream.
//!
//! ```text
//! [4B magic 'PQCV'][1B version=1]
//! [u32 jsonLength][jsonBytes]
//! [u32 binCount][ repeated: u32 binLength + binBytes ]
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"PQCV";
pub const VERSION: u8 = 1;

const BINARY_MARKER_KEY: &str = "__pq_binary_ref";
const SPECIAL_TAG_KEY: &str = "__pq_special";

/// A structured value the codec can encode. This mirrors JSON's shape plus
/// the special scalars spreadsheet tool parameters actually need, and a
/// first-class binary variant that is never inlined into the JSON section.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<StructuredValue>),
    Map(Vec<(String, StructuredValue)>),
    Binary(Vec<u8>),
    Date(String),
    NaN,
    Infinity,
    NegInfinity,
    Undefined,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("value contains a circular reference")]
    Circular,
    #[error("unsupported magic bytes")]
    BadMagic,
    #[error("unsupported codec version {0}")]
    BadVersion(u8),
    #[error("truncated or malformed stream: {0}")]
    Malformed(String),
    #[error("binary reference {0} out of range")]
    BinaryOutOfRange(usize),
}

fn encode_value(value: &StructuredValue, binaries: &mut Vec<Vec<u8>>, depth: usize) -> Result<Value, CodecError> {
    if depth > 64 {
        return Err(CodecError::Circular);
    }
    Ok(match value {
        StructuredValue::Null => Value::Null,
        StructuredValue::Bool(b) => Value::Bool(*b),
        StructuredValue::Number(n) => {
            serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
        }
        StructuredValue::String(s) => Value::String(s.clone()),
        StructuredValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(encode_value(item, binaries, depth + 1)?);
            }
            Value::Array(out)
        }
        StructuredValue::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), encode_value(v, binaries, depth + 1)?);
            }
            Value::Object(map)
        }
        StructuredValue::Binary(bytes) => {
            let idx = binaries.len();
            binaries.push(bytes.clone());
            let mut map = Map::new();
            map.insert(BINARY_MARKER_KEY.to_string(), Value::from(idx));
            Value::Object(map)
        }
        StructuredValue::Date(iso) => tagged("date", Value::String(iso.clone())),
        StructuredValue::NaN => tagged("nan", Value::Null),
        StructuredValue::Infinity => tagged("inf", Value::Null),
        StructuredValue::NegInfinity => tagged("-inf", Value::Null),
        StructuredValue::Undefined => tagged("undefined", Value::Null),
    })
}

fn tagged(tag: &str, inner: Value) -> Value {
    let mut map = Map::new();
    map.insert(SPECIAL_TAG_KEY.to_string(), Value::String(tag.to_string()));
    map.insert("value".to_string(), inner);
    Value::Object(map)
}

fn decode_value(value: &Value, binaries: &[Vec<u8>]) -> Result<StructuredValue, CodecError> {
    Ok(match value {
        Value::Null => StructuredValue::Null,
        Value::Bool(b) => StructuredValue::Bool(*b),
        Value::Number(n) => StructuredValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => StructuredValue::String(s.clone()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(decode_value(item, binaries)?);
            }
            StructuredValue::Array(out)
        }
        Value::Object(map) => {
            if let Some(Value::Number(idx)) = map.get(BINARY_MARKER_KEY) {
                let idx = idx.as_u64().unwrap_or(u64::MAX) as usize;
                let bytes = binaries
                    .get(idx)
                    .cloned()
                    .ok_or(CodecError::BinaryOutOfRange(idx))?;
                return Ok(StructuredValue::Binary(bytes));
            }
            if let Some(Value::String(tag)) = map.get(SPECIAL_TAG_KEY) {
                return Ok(match tag.as_str() {
                    "date" => StructuredValue::Date(
                        map.get("value")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    ),
                    "nan" => StructuredValue::NaN,
                    "inf" => StructuredValue::Infinity,
                    "-inf" => StructuredValue::NegInfinity,
                    "undefined" => StructuredValue::Undefined,
                    other => return Err(CodecError::Malformed(format!("unknown special tag {other}"))),
                });
            }
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                entries.push((k.clone(), decode_value(v, binaries)?));
            }
            StructuredValue::Map(entries)
        }
    })
}

/// Encodes a structured value into the PQCV byte stream. Refuses (does not
/// silently truncate) values nested deeper than the codec supports.
pub fn encode(value: &StructuredValue) -> Result<Vec<u8>, CodecError> {
    let mut binaries = Vec::new();
    let json_value = encode_value(value, &mut binaries, 0)?;
    let json_bytes = serde_json::to_vec(&json_value).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let mut out = Vec::with_capacity(9 + json_bytes.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&(json_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&(binaries.len() as u32).to_be_bytes());
    for blob in &binaries {
        out.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        out.extend_from_slice(blob);
    }
    Ok(out)
}

/// Decodes a PQCV byte stream back into a structured value.
pub fn decode(bytes: &[u8]) -> Result<StructuredValue, CodecError> {
    if bytes.len() < 9 || &bytes[0..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = bytes[4];
    if version != VERSION {
        return Err(CodecError::BadVersion(version));
    }
    let mut cursor = 5usize;
    let json_len = read_u32(bytes, &mut cursor)? as usize;
    let json_bytes = bytes
        .get(cursor..cursor + json_len)
        .ok_or_else(|| CodecError::Malformed("json section truncated".into()))?;
    cursor += json_len;
    let json_value: Value =
        serde_json::from_slice(json_bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let bin_count = read_u32(bytes, &mut cursor)? as usize;
    let mut binaries = Vec::with_capacity(bin_count);
    for _ in 0..bin_count {
        let len = read_u32(bytes, &mut cursor)? as usize;
        let blob = bytes
            .get(cursor..cursor + len)
            .ok_or_else(|| CodecError::Malformed("binary section truncated".into()))?;
        binaries.push(blob.to_vec());
        cursor += len;
    }

    decode_value(&json_value, &binaries)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, CodecError> {
    let slice = bytes
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| CodecError::Malformed("truncated length prefix".into()))?;
    *cursor += 4;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

/// Helper used by cache integration tests and the filesystem store's
/// binary-marker convention.
pub fn is_binary_marker(map: &HashMap<String, Value>) -> bool {
    map.contains_key(BINARY_MARKER_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars_and_arrays() {
        let value = StructuredValue::Array(vec![
            StructuredValue::Number(1.0),
            StructuredValue::String("hi".into()),
            StructuredValue::Bool(true),
            StructuredValue::Null,
        ]);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_binary_payload() {
        let value = StructuredValue::Map(vec![
            ("name".to_string(), StructuredValue::String("chart.png".into())),
            ("data".to_string(), StructuredValue::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF])),
        ]);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_special_scalars() {
        let value = StructuredValue::Array(vec![
            StructuredValue::NaN,
            StructuredValue::Infinity,
            StructuredValue::NegInfinity,
            StructuredValue::Undefined,
            StructuredValue::Date("2024-01-01T00:00:00Z".into()),
        ]);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(decode(b"NOPE1234"), Err(CodecError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_stream() {
        let value = StructuredValue::String("x".repeat(100));
        let mut bytes = encode(&value).unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(decode(&bytes).is_err());
    }
}
