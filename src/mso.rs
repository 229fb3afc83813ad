//! The Mobile Security Object: the issuer-signed structure that binds the device's public key and
//! the per-attribute digests to a `docType` and validity window (§3, §4.D).

use chrono::{DateTime, Utc};
use ciborium::value::Value;
use coset::CborSerializable;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::serialization::CborError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

/// `digestID -> digest` for a single namespace, as stored under `valueDigests`.
pub type DigestIDs = IndexMap<u64, ByteBuf>;

/// `namespace -> DigestIDs`, as stored under `valueDigests`.
pub type ValueDigests = IndexMap<String, DigestIDs>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidityInfo {
    pub signed: crate::iso::Tdate,
    #[serde(rename = "validFrom")]
    pub valid_from: crate::iso::Tdate,
    #[serde(rename = "validUntil")]
    pub valid_until: crate::iso::Tdate,
    #[serde(rename = "expectedUpdate", default, skip_serializing_if = "Option::is_none")]
    pub expected_update: Option<crate::iso::Tdate>,
}

impl ValidityInfo {
    /// `validFrom <= at <= validUntil` (§4.D, overlap check against the caller-supplied reference
    /// time; the spec does not additionally require `signed <= at`, matching the teacher's
    /// `ValidityRequirement::AllowNotYetValid` default for already-issued credentials).
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.0 <= at && at <= self.valid_until.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceKeyInfo {
    #[serde(rename = "deviceKey")]
    device_key: Value,
    #[serde(rename = "keyAuthorizations", default, skip_serializing_if = "Option::is_none")]
    pub key_authorizations: Option<Value>,
    #[serde(rename = "keyInfo", default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<Value>,
}

impl DeviceKeyInfo {
    /// The device's public key, as a `coset::CoseKey`. `coset` does its own CBOR (de)serialization
    /// rather than implementing `serde::Serialize`, so the raw `ciborium::Value` is bridged through
    /// a re-encode.
    pub fn device_key(&self) -> Result<coset::CoseKey, CborError> {
        let bytes = crate::serialization::cbor_serialize(&self.device_key)?;
        coset::CoseKey::from_slice(&bytes)
            .map_err(|_| CborError::Tag24NotBytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileSecurityObject {
    pub version: String,
    #[serde(rename = "digestAlgorithm")]
    pub digest_algorithm: DigestAlgorithm,
    #[serde(rename = "valueDigests")]
    pub value_digests: ValueDigests,
    #[serde(rename = "deviceKeyInfo")]
    pub device_key_info: DeviceKeyInfo,
    #[serde(rename = "docType")]
    pub doc_type: String,
    #[serde(rename = "validityInfo")]
    pub validity_info: ValidityInfo,
}

impl MobileSecurityObject {
    pub fn digest_for(&self, namespace: &str, digest_id: u64) -> Option<&[u8]> {
        self.value_digests
            .get(namespace)
            .and_then(|ids| ids.get(&digest_id))
            .map(|b| b.as_slice())
    }
}
