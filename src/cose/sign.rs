//! `COSE_Sign1`/`COSE_Mac0` wrappers, grounded on the teacher's `MdocCose<C, T>` (a thin layer
//! over `coset` adding `clone_with_payload` and a `verify` that dispatches on the algorithm header,
//! per §4.B/§4.E).

use ciborium::value::Value;
use coset::{iana, AsCborValue, CborSerializable, CoseMac0, CoseSign1, Header};
use ed25519_dalek::Verifier as _;
use p256::ecdsa::signature::Verifier as _;
use p384::ecdsa::signature::Verifier as _;
use p521::ecdsa::signature::Verifier as _;
use ring::hmac;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

use super::key::{symmetric_key_bytes, KeyError, VerifyingKey};

#[derive(Debug, thiserror::Error)]
pub enum CoseError {
    #[error("COSE structure is not valid CBOR: {0}")]
    Malformed(String),
    #[error("COSE key could not be converted to a verifying key: {0}")]
    Key(#[from] KeyError),
    #[error("protected header does not name a supported algorithm")]
    UnsupportedAlgorithm,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("MAC verification failed")]
    MacInvalid,
}

fn algorithm_of(header: &Header) -> Option<iana::Algorithm> {
    match header.alg {
        Some(coset::Algorithm::Assigned(alg)) => Some(alg),
        _ => None,
    }
}

/// `COSE_Sign1` as carried in `IssuerAuth` and `DeviceAuth::DeviceSignature`.
#[derive(Debug, Clone)]
pub struct MdocCoseSign1(pub CoseSign1);

impl MdocCoseSign1 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoseError> {
        CoseSign1::from_slice(bytes)
            .map(Self)
            .map_err(|e| CoseError::Malformed(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CoseError> {
        self.0
            .clone()
            .to_vec()
            .map_err(|e| CoseError::Malformed(e.to_string()))
    }

    /// Returns a clone with `payload` substituted, for detached-payload signatures where the
    /// verifier reconstructs the signed bytes itself (e.g. `DeviceAuthenticationBytes`).
    pub fn clone_with_payload(&self, payload: Vec<u8>) -> Self {
        let mut clone = self.0.clone();
        clone.payload = Some(payload);
        Self(clone)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.0.payload.as_deref()
    }

    /// Verifies the signature against `key`, using the algorithm named in the protected header.
    pub fn verify(&self, key: &coset::CoseKey) -> Result<(), CoseError> {
        let alg = algorithm_of(&self.0.protected.header).ok_or(CoseError::UnsupportedAlgorithm)?;
        let verifying_key = VerifyingKey::try_from(key)?;
        self.0
            .verify_signature(&[], |sig, data| verify_asymmetric(alg, &verifying_key, sig, data))
    }
}

fn verify_asymmetric(
    alg: iana::Algorithm,
    key: &VerifyingKey,
    sig: &[u8],
    data: &[u8],
) -> Result<(), CoseError> {
    match (alg, key) {
        (iana::Algorithm::ES256, VerifyingKey::P256(k)) => {
            let signature = p256::ecdsa::Signature::from_slice(sig)
                .map_err(|_| CoseError::SignatureInvalid)?;
            k.verify(data, &signature).map_err(|_| CoseError::SignatureInvalid)
        }
        (iana::Algorithm::ES384, VerifyingKey::P384(k)) => {
            let signature = p384::ecdsa::Signature::from_slice(sig)
                .map_err(|_| CoseError::SignatureInvalid)?;
            k.verify(data, &signature).map_err(|_| CoseError::SignatureInvalid)
        }
        (iana::Algorithm::ES512, VerifyingKey::P521(k)) => {
            let signature = p521::ecdsa::Signature::from_slice(sig)
                .map_err(|_| CoseError::SignatureInvalid)?;
            k.verify(data, &signature).map_err(|_| CoseError::SignatureInvalid)
        }
        (iana::Algorithm::EdDSA, VerifyingKey::Ed25519(k)) => {
            let signature = ed25519_dalek::Signature::from_slice(sig)
                .map_err(|_| CoseError::SignatureInvalid)?;
            k.verify(data, &signature).map_err(|_| CoseError::SignatureInvalid)
        }
        _ => Err(CoseError::UnsupportedAlgorithm),
    }
}

/// `COSE_Mac0` as carried in `DeviceAuth::DeviceMac`.
#[derive(Debug, Clone)]
pub struct MdocCoseMac0(pub CoseMac0);

impl MdocCoseMac0 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoseError> {
        CoseMac0::from_slice(bytes)
            .map(Self)
            .map_err(|e| CoseError::Malformed(e.to_string()))
    }

    pub fn clone_with_payload(&self, payload: Vec<u8>) -> Self {
        let mut clone = self.0.clone();
        clone.payload = Some(payload);
        Self(clone)
    }

    /// Verifies the tag using `key`, an `EMacKey` derived via ECDH + HKDF (§4.E). Only
    /// HMAC-256/256 (alg 5) is supported, matching the spec's algorithm table.
    pub fn verify(&self, key: &hmac::Key) -> Result<(), CoseError> {
        let alg = algorithm_of(&self.0.protected.header).ok_or(CoseError::UnsupportedAlgorithm)?;
        if alg != iana::Algorithm::HMAC_256_256 {
            return Err(CoseError::UnsupportedAlgorithm);
        }
        self.0
            .verify_tag(&[], |tag, data| {
                hmac::verify(key, data, tag).map_err(|_| CoseError::MacInvalid)
            })
    }
}

impl Serialize for MdocCoseSign1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self
            .0
            .clone()
            .to_cbor_value()
            .map_err(|e| serde::ser::Error::custom(e.to_string()))?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MdocCoseSign1 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        CoseSign1::from_cbor_value(value)
            .map(MdocCoseSign1)
            .map_err(|e| D::Error::custom(e.to_string()))
    }
}

impl Serialize for MdocCoseMac0 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self
            .0
            .clone()
            .to_cbor_value()
            .map_err(|e| serde::ser::Error::custom(e.to_string()))?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MdocCoseMac0 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        CoseMac0::from_cbor_value(value)
            .map(MdocCoseMac0)
            .map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Builds an `hmac::Key` from a raw `COSE_Key` carrying symmetric key material, used only in
/// tests to construct fixtures; the production path derives the key via ECDH (§4.E).
#[cfg(test)]
pub fn hmac_key_from_cose(cose_key: &coset::CoseKey) -> Result<hmac::Key, CoseError> {
    Ok(hmac::Key::new(hmac::HMAC_SHA256, symmetric_key_bytes(cose_key)?))
}
