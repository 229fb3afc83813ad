//! Deterministic CBOR (RFC 8949 §4.2.1) decoder/encoder for dynamic values.
//!
//! This module owns exactly the part of the wire format that cannot be expressed as a fixed
//! `serde` struct: disclosed attribute values (`DataElementValue`), whose shape is only known at
//! decode time. Strongly-typed structures (the MSO, `IssuerSignedItem`, etc.) are decoded through
//! `ciborium` via [`crate::serialization`] instead, relying on serde's struct-field order to match
//! the CDDL member order mandated by ISO/IEC 18013-5.
//!
//! Decoding never recurses into indefinite-length items, rejects duplicate map keys, and preserves
//! map insertion order on decode (so an already-canonical input round-trips byte for byte).
//! Encoding always sorts map entries by their encoded key bytes (length, then lexicographic).

use std::fmt;

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum CborError {
    #[error("unexpected end of input")]
    Eof,
    #[error("indefinite-length items are not supported")]
    IndefiniteLength,
    #[error("duplicate map key")]
    DuplicateKey,
    #[error("invalid UTF-8 in text string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("trailing bytes after decoding a single item")]
    TrailingData,
    #[error("reserved additional information value")]
    ReservedAdditionalInfo,
    #[error("value does not fit the requested type")]
    TypeMismatch,
}

type Result<T> = std::result::Result<T, CborError>;

/// A dynamically-typed CBOR value, per the data model in the design notes.
#[derive(Clone, PartialEq)]
pub enum CborValue {
    /// Covers both CBOR major type 0 (unsigned) and 1 (negative) integers.
    Int(i128),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    /// Insertion-ordered on decode; sorted by encoded key bytes on encode.
    Map(Vec<(CborValue, CborValue)>),
    Tag(u64, Box<CborValue>),
    Bool(bool),
    Null,
    Float(f64),
}

impl fmt::Debug for CborValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CborValue::Int(v) => write!(f, "Int({v})"),
            CborValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            CborValue::Text(s) => write!(f, "Text({s:?})"),
            CborValue::Array(a) => f.debug_list().entries(a).finish(),
            CborValue::Map(m) => f.debug_map().entries(m.iter().map(|(k, v)| (k, v))).finish(),
            CborValue::Tag(t, v) => write!(f, "Tag({t}, {v:?})"),
            CborValue::Bool(b) => write!(f, "Bool({b})"),
            CborValue::Null => write!(f, "Null"),
            CborValue::Float(v) => write!(f, "Float({v})"),
        }
    }
}

impl CborValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CborValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            CborValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CborValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Tag 0: RFC 3339 date-time, no fractional seconds, trailing `Z`.
    pub fn as_tag0_datetime(&self) -> Option<&str> {
        match self {
            CborValue::Tag(0, inner) => inner.as_text(),
            _ => None,
        }
    }

    /// Tag 1004: full-date (`YYYY-MM-DD`).
    pub fn as_tag1004_full_date(&self) -> Option<&str> {
        match self {
            CborValue::Tag(1004, inner) => inner.as_text(),
            _ => None,
        }
    }
}

impl From<CborValue> for ciborium::value::Value {
    fn from(value: CborValue) -> Self {
        use ciborium::value::Value as V;
        match value {
            CborValue::Int(v) if v >= 0 => V::Integer((v as u128).try_into().unwrap_or_default()),
            CborValue::Int(v) => V::Integer(v.try_into().unwrap_or_default()),
            CborValue::Bytes(b) => V::Bytes(b),
            CborValue::Text(s) => V::Text(s),
            CborValue::Array(items) => V::Array(items.into_iter().map(Into::into).collect()),
            CborValue::Map(entries) => {
                V::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
            CborValue::Tag(tag, inner) => V::Tag(tag, Box::new((*inner).into())),
            CborValue::Bool(b) => V::Bool(b),
            CborValue::Null => V::Null,
            CborValue::Float(f) => V::Float(f),
        }
    }
}

impl TryFrom<ciborium::value::Value> for CborValue {
    type Error = CborError;

    fn try_from(value: ciborium::value::Value) -> Result<Self> {
        use ciborium::value::Value as V;
        Ok(match value {
            V::Integer(i) => CborValue::Int(i128::from(i)),
            V::Bytes(b) => CborValue::Bytes(b),
            V::Text(s) => CborValue::Text(s),
            V::Array(items) => {
                CborValue::Array(items.into_iter().map(TryInto::try_into).collect::<Result<_>>()?)
            }
            V::Map(entries) => CborValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k.try_into()?, v.try_into()?)))
                    .collect::<Result<_>>()?,
            ),
            V::Tag(tag, inner) => CborValue::Tag(tag, Box::new((*inner).try_into()?)),
            V::Bool(b) => CborValue::Bool(b),
            V::Null => CborValue::Null,
            V::Float(f) => CborValue::Float(f),
            _ => return Err(CborError::TypeMismatch),
        })
    }
}

impl Serialize for CborValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ciborium::value::Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CborValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = ciborium::value::Value::deserialize(deserializer)?;
        CborValue::try_from(value).map_err(D::Error::custom)
    }
}

/// Decode exactly one CBOR item, failing on any trailing bytes.
pub fn decode_one(bytes: &[u8]) -> Result<CborValue> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = decode_item(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return Err(CborError::TrailingData);
    }
    Ok(value)
}

/// Decode exactly one CBOR item, returning it along with the number of bytes it occupied.
/// Used to capture the *original encoded byte slice* of an embedded (tag 24) item.
pub fn decode_item_prefix(bytes: &[u8]) -> Result<(CborValue, usize)> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = decode_item(&mut cursor)?;
    Ok((value, cursor.pos))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_byte(&mut self) -> Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or(CborError::Eof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CborError::Eof)?;
        let slice = self.bytes.get(self.pos..end).ok_or(CborError::Eof)?;
        self.pos = end;
        Ok(slice)
    }
}

/// Reads the argument of a major-type header. Returns `None` when the additional info is 31
/// (indefinite length) so the caller can reject it with context.
fn read_argument(cursor: &mut Cursor, additional_info: u8) -> Result<Option<u64>> {
    match additional_info {
        0..=23 => Ok(Some(additional_info as u64)),
        24 => Ok(Some(cursor.next_byte()? as u64)),
        25 => {
            let bytes = cursor.take(2)?;
            Ok(Some(u16::from_be_bytes(bytes.try_into().unwrap()) as u64))
        }
        26 => {
            let bytes = cursor.take(4)?;
            Ok(Some(u32::from_be_bytes(bytes.try_into().unwrap()) as u64))
        }
        27 => {
            let bytes = cursor.take(8)?;
            Ok(Some(u64::from_be_bytes(bytes.try_into().unwrap())))
        }
        28..=30 => Err(CborError::ReservedAdditionalInfo),
        31 => Ok(None),
        _ => unreachable!("additional_info is a 5-bit field"),
    }
}

fn decode_item(cursor: &mut Cursor) -> Result<CborValue> {
    let header = cursor.next_byte()?;
    let major = header >> 5;
    let additional_info = header & 0x1f;

    match major {
        0 => {
            let arg = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            Ok(CborValue::Int(arg as i128))
        }
        1 => {
            let arg = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            Ok(CborValue::Int(-1 - arg as i128))
        }
        2 => {
            let len = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            Ok(CborValue::Bytes(cursor.take(len as usize)?.to_vec()))
        }
        3 => {
            let len = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            let raw = cursor.take(len as usize)?;
            Ok(CborValue::Text(std::str::from_utf8(raw)?.to_owned()))
        }
        4 => {
            let len = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(decode_item(cursor)?);
            }
            Ok(CborValue::Array(items))
        }
        5 => {
            let len = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            let mut entries: Vec<(CborValue, CborValue)> = Vec::with_capacity(len as usize);
            let mut seen_keys: Vec<Vec<u8>> = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let key = decode_item(cursor)?;
                let value = decode_item(cursor)?;
                let key_bytes = encode(&key);
                if seen_keys.contains(&key_bytes) {
                    return Err(CborError::DuplicateKey);
                }
                seen_keys.push(key_bytes);
                entries.push((key, value));
            }
            Ok(CborValue::Map(entries))
        }
        6 => {
            let tag = read_argument(cursor, additional_info)?.ok_or(CborError::IndefiniteLength)?;
            let inner = decode_item(cursor)?;
            Ok(CborValue::Tag(tag, Box::new(inner)))
        }
        7 => match additional_info {
            20 => Ok(CborValue::Bool(false)),
            21 => Ok(CborValue::Bool(true)),
            22 | 23 => Ok(CborValue::Null),
            25 => {
                let bytes = cursor.take(2)?;
                let half = u16::from_be_bytes(bytes.try_into().unwrap());
                Ok(CborValue::Float(half_to_f64(half)))
            }
            26 => {
                let bytes = cursor.take(4)?;
                Ok(CborValue::Float(f32::from_be_bytes(bytes.try_into().unwrap()) as f64))
            }
            27 => {
                let bytes = cursor.take(8)?;
                Ok(CborValue::Float(f64::from_be_bytes(bytes.try_into().unwrap())))
            }
            31 => Err(CborError::IndefiniteLength),
            _ => Err(CborError::TypeMismatch),
        },
        _ => unreachable!("major type is a 3-bit field"),
    }
}

fn half_to_f64(half: u16) -> f64 {
    let sign = (half >> 15) & 1;
    let exponent = (half >> 10) & 0x1f;
    let fraction = half & 0x3ff;
    let value = if exponent == 0 {
        (fraction as f64) * 2f64.powi(-24)
    } else if exponent == 0x1f {
        if fraction == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        (1.0 + fraction as f64 / 1024.0) * 2f64.powi(exponent as i32 - 15)
    };
    if sign == 1 {
        -value
    } else {
        value
    }
}

/// Encodes an array header for `items.len()` followed by each item's bytes verbatim, with no
/// re-parsing. Used to assemble `DeviceAuthentication`/`MAC_structure`-style arrays where one
/// element (e.g. a caller-supplied `SessionTranscript`) must be spliced in exactly as received,
/// regardless of whether its own encoding happens to be canonical.
pub fn encode_array_of_raw_items(items: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_header(&mut out, 4, items.len() as u64);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// Canonically encode a value: shortest-form integer headers, definite lengths, map entries
/// sorted by their own encoded key bytes (length, then lexicographic).
pub fn encode(value: &CborValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_header(out: &mut Vec<u8>, major: u8, arg: u64) {
    let major = major << 5;
    match arg {
        0..=23 => out.push(major | arg as u8),
        24..=0xff => {
            out.push(major | 24);
            out.push(arg as u8);
        }
        0x100..=0xffff => {
            out.push(major | 25);
            out.extend_from_slice(&(arg as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(major | 26);
            out.extend_from_slice(&(arg as u32).to_be_bytes());
        }
        _ => {
            out.push(major | 27);
            out.extend_from_slice(&arg.to_be_bytes());
        }
    }
}

fn encode_into(value: &CborValue, out: &mut Vec<u8>) {
    match value {
        CborValue::Int(v) if *v >= 0 => encode_header(out, 0, *v as u64),
        CborValue::Int(v) => encode_header(out, 1, (-1 - *v) as u64),
        CborValue::Bytes(b) => {
            encode_header(out, 2, b.len() as u64);
            out.extend_from_slice(b);
        }
        CborValue::Text(s) => {
            encode_header(out, 3, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        CborValue::Array(items) => {
            encode_header(out, 4, items.len() as u64);
            for item in items {
                encode_into(item, out);
            }
        }
        CborValue::Map(entries) => {
            let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = entries
                .iter()
                .map(|(k, v)| (encode(k), encode(v)))
                .collect();
            encoded.sort_by(|(a, _), (b, _)| (a.len(), a).cmp(&(b.len(), b)));
            encode_header(out, 5, encoded.len() as u64);
            for (key, value) in encoded {
                out.extend_from_slice(&key);
                out.extend_from_slice(&value);
            }
        }
        CborValue::Tag(tag, inner) => {
            encode_header(out, 6, *tag);
            encode_into(inner, out);
        }
        CborValue::Bool(false) => out.push(0xf4),
        CborValue::Bool(true) => out.push(0xf5),
        CborValue::Null => out.push(0xf6),
        CborValue::Float(v) => {
            out.push(0xfb);
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_map_is_sorted_by_key_bytes() {
        let value = CborValue::Map(vec![
            (CborValue::Text("b".into()), CborValue::Int(2)),
            (CborValue::Text("a".into()), CborValue::Int(1)),
            (CborValue::Int(0), CborValue::Int(0)),
        ]);
        let encoded = encode(&value);
        // The integer key (1 byte) sorts before both 1-byte-length text keys, which then sort
        // lexicographically by their encoded bytes ("a" < "b").
        let decoded = decode_one(&encoded).unwrap();
        match decoded {
            CborValue::Map(entries) => {
                assert_eq!(entries[0].0, CborValue::Int(0));
                assert_eq!(entries[1].0, CborValue::Text("a".into()));
                assert_eq!(entries[2].0, CborValue::Text("b".into()));
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn rejects_indefinite_length_array() {
        // 0x9f = array, indefinite length
        let bytes = [0x9f, 0x01, 0xff];
        assert_matches::assert_matches!(decode_one(&bytes), Err(CborError::IndefiniteLength));
    }

    #[test]
    fn rejects_duplicate_map_keys() {
        // {"a": 1, "a": 2}
        let bytes = [0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02];
        assert_matches::assert_matches!(decode_one(&bytes), Err(CborError::DuplicateKey));
    }

    #[test]
    fn preserves_already_canonical_insertion_order_on_decode() {
        // {0: 0, "a": 1, "b": 2} is already canonical; decoding then re-encoding must round-trip.
        let value = CborValue::Map(vec![
            (CborValue::Int(0), CborValue::Int(0)),
            (CborValue::Text("a".into()), CborValue::Int(1)),
            (CborValue::Text("b".into()), CborValue::Int(2)),
        ]);
        let encoded = encode(&value);
        let decoded = decode_one(&encoded).unwrap();
        let re_encoded = encode(&decoded);
        assert_eq!(encoded, re_encoded);
    }

    #[test]
    fn tag24_embedded_cbor_round_trips_verbatim() {
        let inner = encode(&CborValue::Text("hello".into()));
        let wrapped = CborValue::Tag(24, Box::new(CborValue::Bytes(inner.clone())));
        let encoded = encode(&wrapped);
        let (decoded, consumed) = decode_item_prefix(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        match decoded {
            CborValue::Tag(24, boxed) => assert_eq!(boxed.as_bytes().unwrap(), inner.as_slice()),
            _ => panic!("expected tag 24"),
        }
    }
}
