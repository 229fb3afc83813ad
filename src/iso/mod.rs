//! ISO/IEC 18013-5 data model: the wire types decoded from a `DeviceResponse` (§3).

pub mod disclosure;
pub mod mdocs;

pub use disclosure::*;
pub use mdocs::*;

use chrono::{DateTime, Utc};
use ciborium::value::Value;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

/// CBOR tag 0: an RFC 3339 date-time string, used for `ValidityInfo`'s `signed`/`validFrom`/
/// `validUntil`/`expectedUpdate` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tdate(pub DateTime<Utc>);

impl Serialize for Tdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        Value::Tag(0, Box::new(Value::Text(text))).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tdate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let Value::Tag(0, inner) = value else {
            return Err(D::Error::custom("expected CBOR tag 0 (tdate)"));
        };
        let Value::Text(text) = *inner else {
            return Err(D::Error::custom("tdate content was not a text string"));
        };
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| Tdate(dt.with_timezone(&Utc)))
            .map_err(D::Error::custom)
    }
}
