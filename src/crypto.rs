//! Digests and key derivation, grounded on the teacher's `utils::crypto` module: SHA-2 digests
//! over canonical CBOR (§4.D digest binding) and the ECDH + HKDF derivation of the `EMacKey` used
//! to verify `DeviceMac` (§4.E).

use p256::ecdh::diffie_hellman;
use p256::ecdsa::{SigningKey, VerifyingKey};
use ring::hmac;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::mso::DigestAlgorithm;
use crate::serialization::{cbor_serialize, CborError};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("CBOR serialization of digest input failed: {0}")]
    Cbor(#[from] CborError),
    #[error("HKDF expansion failed")]
    Hkdf,
}

/// Hashes `val`'s canonical CBOR encoding with `alg`, as `IssuerSignedItemBytes` digests are
/// computed (§4.D).
pub fn cbor_digest<T: Serialize>(alg: DigestAlgorithm, val: &T) -> Result<Vec<u8>, CryptoError> {
    let bytes = cbor_serialize(val)?;
    Ok(digest(alg, &bytes))
}

/// Hashes an already-encoded byte slice with `alg`. Used for `IssuerSignedItemBytes`, where the
/// digest must cover the exact tag-24 inner bytes received on the wire, not a re-encoding of the
/// parsed value.
pub fn digest(alg: DigestAlgorithm, bytes: &[u8]) -> Vec<u8> {
    match alg {
        DigestAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
        DigestAlgorithm::Sha384 => Sha384::digest(bytes).to_vec(),
        DigestAlgorithm::Sha512 => Sha512::digest(bytes).to_vec(),
    }
}

/// Derives the `EMacKey` used to verify a `DeviceMac`. ECDH is symmetric, so the verifier (holding
/// the reader's ephemeral private key and the device's public key from the MSO) arrives at the
/// same shared secret the device did from its own private key and the reader's public key. HKDF
/// then runs with `info = "EMacKey"` and `salt = SHA-256(SessionTranscriptBytes)` (§4.E).
pub fn derive_emac_key(
    our_privkey: &SigningKey,
    their_pubkey: &VerifyingKey,
    session_transcript_bytes: &[u8],
) -> Result<hmac::Key, CryptoError> {
    let shared_secret = diffie_hellman(our_privkey.as_nonzero_scalar(), their_pubkey.as_affine());
    let salt = Sha256::digest(session_transcript_bytes);
    hkdf_hmac_key(shared_secret.raw_secret_bytes(), &salt, b"EMacKey")
}

fn hkdf_hmac_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<hmac::Key, CryptoError> {
    let salt = hmac::Key::new(hmac::HMAC_SHA256, salt);
    let prk = hmac::sign(&salt, ikm);

    let mut okm = Vec::with_capacity(32);
    let mut previous: Vec<u8> = Vec::new();
    let mut counter: u8 = 1;
    while okm.len() < 32 {
        let prk_key = hmac::Key::new(hmac::HMAC_SHA256, prk.as_ref());
        let mut input = previous.clone();
        input.extend_from_slice(info);
        input.push(counter);
        let block = hmac::sign(&prk_key, &input);
        previous = block.as_ref().to_vec();
        okm.extend_from_slice(block.as_ref());
        counter = counter.checked_add(1).ok_or(CryptoError::Hkdf)?;
    }
    okm.truncate(32);
    Ok(hmac::Key::new(hmac::HMAC_SHA256, &okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_algorithm_sensitive() {
        let a = digest(DigestAlgorithm::Sha256, b"hello");
        let b = digest(DigestAlgorithm::Sha256, b"hello");
        let c = digest(DigestAlgorithm::Sha384, b"hello");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert_eq!(c.len(), 48);
    }

    #[test]
    fn sha256_matches_known_answer() {
        let expected = hex_literal::hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(digest(DigestAlgorithm::Sha256, b"abc"), expected);
    }
}
