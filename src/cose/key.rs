//! `COSE_Key` to concrete public-key conversions, grounded on the teacher's
//! `TryFrom<&CoseKey> for VerifyingKey` (and back) in `utils::crypto`, extended to the full
//! algorithm table in §4.B (ES256/ES384/ES512/EdDSA/HMAC).

use coset::{iana, CoseKey, KeyType, Label};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("COSE key is missing required coordinate {0}")]
    MissingCoordinate(&'static str),
    #[error("COSE key type/curve combination is not one of ES256/ES384/ES512/EdDSA")]
    UnsupportedKeyType,
    #[error("COSE key coordinate could not be parsed as a curve point")]
    CoordinateParseFailed,
    #[error("COSE key is missing a symmetric key value (label -1)")]
    MissingSymmetricKey,
}

/// A verifying key in one of the four asymmetric algorithms this verifier supports (§4.B).
pub enum VerifyingKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

fn ec2_coordinate(cose_key: &CoseKey, label: i64, name: &'static str) -> Result<&[u8], KeyError> {
    cose_key
        .params
        .iter()
        .find_map(|(l, v)| (*l == Label::Int(label)).then(|| v.as_bytes()).flatten())
        .map(Vec::as_slice)
        .ok_or(KeyError::MissingCoordinate(name))
}

impl TryFrom<&CoseKey> for VerifyingKey {
    type Error = KeyError;

    fn try_from(cose_key: &CoseKey) -> Result<Self, Self::Error> {
        match cose_key.kty {
            KeyType::Assigned(iana::KeyType::EC2) => {
                let crv = cose_key
                    .params
                    .iter()
                    .find_map(|(l, v)| (*l == Label::Int(iana::Ec2KeyParameter::Crv as i64)).then(|| v.as_integer()).flatten());
                let x = ec2_coordinate(cose_key, iana::Ec2KeyParameter::X as i64, "x")?;
                let y = ec2_coordinate(cose_key, iana::Ec2KeyParameter::Y as i64, "y")?;
                let mut sec1 = vec![0x04u8];
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);
                match crv.map(i128::from) {
                    Some(v) if v == iana::EllipticCurve::P_256 as i128 => {
                        p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                            .map(VerifyingKey::P256)
                            .map_err(|_| KeyError::CoordinateParseFailed)
                    }
                    Some(v) if v == iana::EllipticCurve::P_384 as i128 => {
                        p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                            .map(VerifyingKey::P384)
                            .map_err(|_| KeyError::CoordinateParseFailed)
                    }
                    Some(v) if v == iana::EllipticCurve::P_521 as i128 => {
                        p521::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                            .map(VerifyingKey::P521)
                            .map_err(|_| KeyError::CoordinateParseFailed)
                    }
                    _ => Err(KeyError::UnsupportedKeyType),
                }
            }
            KeyType::Assigned(iana::KeyType::OKP) => {
                let x = ec2_coordinate(cose_key, iana::OkpKeyParameter::X as i64, "x")?;
                let bytes: [u8; 32] = x.try_into().map_err(|_| KeyError::CoordinateParseFailed)?;
                ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map(VerifyingKey::Ed25519)
                    .map_err(|_| KeyError::CoordinateParseFailed)
            }
            _ => Err(KeyError::UnsupportedKeyType),
        }
    }
}

/// The raw symmetric key material behind an HMAC COSE_Mac0 verification (§4.B, HMAC-256/256).
pub fn symmetric_key_bytes(cose_key: &CoseKey) -> Result<&[u8], KeyError> {
    cose_key
        .params
        .iter()
        .find_map(|(l, v)| (*l == Label::Int(iana::SymmetricKeyParameter::K as i64)).then(|| v.as_bytes()).flatten())
        .map(Vec::as_slice)
        .ok_or(KeyError::MissingSymmetricKey)
}

impl VerifyingKey {
    /// Builds a verifying key straight from a certificate's SubjectPublicKeyInfo bytes, picking
    /// the curve from the `issuerAuth`/`deviceSignature` COSE `alg` header rather than SPKI's own
    /// AlgorithmIdentifier (§4.B): an mDL issuer certificate's key and the algorithm the issuer
    /// signs with are required to agree, so the `alg` header is authoritative here.
    pub fn from_spki(alg: iana::Algorithm, spki: &[u8]) -> Result<Self, KeyError> {
        match alg {
            iana::Algorithm::ES256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(spki)
                .map(VerifyingKey::P256)
                .map_err(|_| KeyError::CoordinateParseFailed),
            iana::Algorithm::ES384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(spki)
                .map(VerifyingKey::P384)
                .map_err(|_| KeyError::CoordinateParseFailed),
            iana::Algorithm::ES512 => p521::ecdsa::VerifyingKey::from_sec1_bytes(spki)
                .map(VerifyingKey::P521)
                .map_err(|_| KeyError::CoordinateParseFailed),
            iana::Algorithm::EdDSA => {
                let bytes: [u8; 32] = spki.try_into().map_err(|_| KeyError::CoordinateParseFailed)?;
                ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map(VerifyingKey::Ed25519)
                    .map_err(|_| KeyError::CoordinateParseFailed)
            }
            _ => Err(KeyError::UnsupportedKeyType),
        }
    }
}

impl From<&VerifyingKey> for CoseKey {
    /// The reverse of [`TryFrom<&CoseKey> for VerifyingKey`], used to wrap an issuer
    /// certificate's public key as a `COSE_Key` so [`super::sign::MdocCoseSign1::verify`] can use
    /// its usual dispatch-by-`alg` path uniformly for both the issuer and the device key (§4.B).
    fn from(key: &VerifyingKey) -> Self {
        match key {
            VerifyingKey::P256(k) => {
                let point = k.to_encoded_point(false);
                coset::CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_256,
                    point.x().expect("uncompressed point has x").to_vec(),
                    point.y().expect("uncompressed point has y").to_vec(),
                )
                .build()
            }
            VerifyingKey::P384(k) => {
                let point = k.to_encoded_point(false);
                coset::CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_384,
                    point.x().expect("uncompressed point has x").to_vec(),
                    point.y().expect("uncompressed point has y").to_vec(),
                )
                .build()
            }
            VerifyingKey::P521(k) => {
                let point = k.to_encoded_point(false);
                coset::CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_521,
                    point.x().expect("uncompressed point has x").to_vec(),
                    point.y().expect("uncompressed point has y").to_vec(),
                )
                .build()
            }
            VerifyingKey::Ed25519(k) => CoseKey {
                kty: KeyType::Assigned(iana::KeyType::OKP),
                params: vec![
                    (Label::Int(iana::OkpKeyParameter::Crv as i64), ciborium::value::Value::from(iana::EllipticCurve::Ed25519 as i64)),
                    (Label::Int(iana::OkpKeyParameter::X as i64), ciborium::value::Value::Bytes(k.to_bytes().to_vec())),
                ],
                ..Default::default()
            },
        }
    }
}
