//! Test-only certificate generation, gated behind `feature = "mock"`, grounded on the teacher's
//! `mdoc` crate's own `generate` feature flag ("Include code for generating certificates and
//! keys", `rcgen` as an optional dependency). The self-signed-IACA-signs-document-signer shape
//! mirrors what `x509::chain`'s own `#[cfg(test)]` fixtures build inline; this module exposes the
//! same pattern publicly so a downstream crate assembling `DeviceResponse` fixtures for its own
//! tests does not have to duplicate it.

use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePrivateKey;
use rand_core::OsRng;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

use super::Certificate;

/// A freshly generated IACA root and the document signer certificate it issued (§4.C), along with
/// both P-256 signing keys so the caller can produce a COSE_Sign1 `issuerAuth` over an MSO.
pub struct MockTrustChain {
    pub iaca_certificate: Certificate,
    pub iaca_key: SigningKey,
    pub document_signer_certificate: Certificate,
    pub document_signer_key: SigningKey,
}

/// Generates a throwaway P-256 IACA root and document signer certificate for `country`
/// (`countryName` on both subjects), signed the way ISO/IEC 18013-5 Annex B expects: the IACA
/// directly signs the document signer, with no intermediate.
pub fn generate_trust_chain(country: &str) -> MockTrustChain {
    let iaca_key = SigningKey::random(&mut OsRng);
    let iaca_key_pair = key_pair_from_signing_key(&iaca_key);
    let mut iaca_params = CertificateParams::default();
    iaca_params.distinguished_name = distinguished_name("Mock IACA", country);
    iaca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let iaca_cert = iaca_params.self_signed(&iaca_key_pair).expect("self-signed IACA certificate");

    let document_signer_key = SigningKey::random(&mut OsRng);
    let document_signer_key_pair = key_pair_from_signing_key(&document_signer_key);
    let mut ds_params = CertificateParams::default();
    ds_params.distinguished_name = distinguished_name("Mock Document Signer", country);
    let ds_cert = ds_params
        .signed_by(&document_signer_key_pair, &iaca_cert, &iaca_key_pair)
        .expect("document signer certificate signed by the mock IACA");

    MockTrustChain {
        iaca_certificate: Certificate::from_der(iaca_cert.der().to_vec()).expect("valid DER"),
        iaca_key,
        document_signer_certificate: Certificate::from_der(ds_cert.der().to_vec()).expect("valid DER"),
        document_signer_key,
    }
}

fn distinguished_name(common_name: &str, country: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name.push(DnType::CountryName, country);
    name
}

fn key_pair_from_signing_key(key: &SigningKey) -> KeyPair {
    let pkcs8 = key.to_pkcs8_der().expect("P-256 key is PKCS8-encodable");
    KeyPair::from_der(pkcs8.as_bytes()).expect("PKCS8 key decodes back into an rcgen KeyPair")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::x509::validate_chain;

    #[test]
    fn generated_chain_validates_against_its_own_iaca() {
        let chain = generate_trust_chain("NL");
        let result = validate_chain(
            &[chain.document_signer_certificate.clone()],
            &[chain.iaca_certificate.clone()],
            Utc::now(),
        );
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn document_signer_subject_carries_the_requested_country() {
        let chain = generate_trust_chain("DE");
        assert_eq!(chain.document_signer_certificate.subject_country().as_deref(), Some("DE"));
    }
}
