//! Helpers for wiring `serde`-derived ISO/IEC 18013-5 structures onto CBOR, grounded on the
//! teacher's `utils::serialization` module: `TaggedBytes` for tag-24 embedding, `cbor_serialize`/
//! `cbor_deserialize` for the plain (de)serialization round trip, and `RequiredValue` for CDDL
//! fields whose value is a fixed constant (e.g. the `"DeviceAuthentication"` context string).

use std::marker::PhantomData;

use ciborium::value::Value;
use serde::{de::DeserializeOwned, de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum CborError {
    #[error("CBOR deserialization failed: {0}")]
    Deserialization(#[from] ciborium::de::Error<std::io::Error>),
    #[error("CBOR serialization failed: {0}")]
    Serialization(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("expected a CBOR tag 24 (embedded CBOR) item")]
    NotTag24,
    #[error("embedded CBOR item was not a byte string")]
    Tag24NotBytes,
}

pub fn cbor_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, CborError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)?;
    Ok(out)
}

pub fn cbor_deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CborError> {
    Ok(ciborium::de::from_reader(bytes)?)
}

/// A CBOR item of the form `tag(24, bstr(<cbor encoding of T>))`, per ISO/IEC 18013-5's
/// `#6.24(bstr .cbor T)` convention (`IssuerSignedItemBytes`, `MobileSecurityObjectBytes`,
/// `DeviceNameSpacesBytes`, `SessionTranscriptBytes`, `DeviceAuthenticationBytes`).
///
/// Digest verification (§4.D) depends on the *exact* bytes the issuer hashed, not a re-encoding of
/// the parsed value, so this type retains the original embedded byte string from decode and
/// re-emits those same bytes on serialize, rather than round-tripping through `T`'s own encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedBytes<T> {
    value: T,
    original_bytes: Vec<u8>,
}

impl<T> TaggedBytes<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// The exact tag-24 inner byte string, as received on the wire.
    pub fn original_bytes(&self) -> &[u8] {
        &self.original_bytes
    }
}

impl<T: Serialize> TaggedBytes<T> {
    /// Construct a fresh `TaggedBytes` by canonically encoding `value` now. Used when *this*
    /// process is the one producing the embedded structure (e.g. building
    /// `DeviceAuthenticationBytes` to verify a signature against), as opposed to having received
    /// it on the wire.
    pub fn new(value: T) -> Result<Self, CborError> {
        let original_bytes = cbor_serialize(&value)?;
        Ok(Self { value, original_bytes })
    }
}

impl<T: Serialize> Serialize for TaggedBytes<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tagged = Value::Tag(24, Box::new(Value::Bytes(self.original_bytes.clone())));
        tagged.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for TaggedBytes<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let outer = Value::deserialize(deserializer)?;
        let Value::Tag(24, inner) = outer else {
            return Err(D::Error::custom(CborError::NotTag24));
        };
        let Value::Bytes(original_bytes) = *inner else {
            return Err(D::Error::custom(CborError::Tag24NotBytes));
        };
        let value = cbor_deserialize(&original_bytes).map_err(D::Error::custom)?;
        Ok(Self { value, original_bytes })
    }
}

/// A field whose value must equal a fixed constant on decode (e.g. the literal string
/// `"DeviceAuthentication"` that opens the `DeviceAuthentication` CDDL array). Serializes as that
/// constant; deserializes successfully only when the wire value matches it.
pub trait RequiredValueTrait {
    type Type: PartialEq + std::fmt::Debug + Serialize + DeserializeOwned + Clone;
    const REQUIRED_VALUE: fn() -> Self::Type;
}

#[derive(Debug, Clone)]
pub struct RequiredValue<T: RequiredValueTrait>(PhantomData<T>);

impl<T: RequiredValueTrait> Default for RequiredValue<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: RequiredValueTrait> Serialize for RequiredValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (T::REQUIRED_VALUE)().serialize(serializer)
    }
}

impl<'de, T: RequiredValueTrait> Deserialize<'de> for RequiredValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = T::Type::deserialize(deserializer)?;
        if value != (T::REQUIRED_VALUE)() {
            return Err(D::Error::custom(format!(
                "expected required value {:?}, found {:?}",
                (T::REQUIRED_VALUE)(),
                value
            )));
        }
        Ok(Self(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Inner {
        a: u64,
        b: String,
    }

    #[test]
    fn tagged_bytes_round_trips_and_retains_original_bytes() {
        let inner = Inner { a: 7, b: "hi".into() };
        let tagged = TaggedBytes::new(inner.clone()).unwrap();
        let encoded = cbor_serialize(&tagged).unwrap();
        let decoded: TaggedBytes<Inner> = cbor_deserialize(&encoded).unwrap();
        assert_eq!(decoded.value(), &inner);
        assert_eq!(decoded.original_bytes(), tagged.original_bytes());
    }
}
