use chrono::{DateTime, Utc};
use itertools::Itertools;

use super::{Certificate, CertificateUsage};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("x5chain carries no certificates")]
    ChainIncomplete,
    #[error("no trust anchor in the provided set issued this certificate")]
    UntrustedRoot,
    #[error("certificate signature could not be verified against its issuer")]
    ChainSignatureInvalid,
    #[error("certificate is not valid at the reference time")]
    CertificateExpired,
    #[error("trust anchor certificate is not a CA")]
    AnchorNotCa,
    #[error("document signer certificate's key usage does not permit digitalSignature")]
    LeafKeyUsageInvalid,
    #[error("document signer certificate is missing the ISO/IEC 18013-5 document signer extended key usage")]
    LeafEkuInvalid,
}

/// Validates `chain` (the document signer certificate, leaf first, followed by any intermediates
/// carried in `x5chain`) against `trust_anchors` (IACA roots), per §4.C: the leaf's key usage and
/// extended key usage are checked against `CertificateUsage::DocumentSigner`, every hop's
/// signature is verified against the next certificate up the chain, every certificate in the path
/// (including the anchor) must be valid at `now`, and the final hop must be issued by one of the
/// configured anchors. ISO/IEC 18013-5 mDL chains are usually two certificates deep (IACA directly
/// signs the document signer), but `x5chain` may carry intermediates, so the walk is not hardcoded
/// to depth 2.
pub fn validate_chain(
    chain: &[Certificate],
    trust_anchors: &[Certificate],
    now: DateTime<Utc>,
) -> Result<Certificate, ChainError> {
    let leaf = chain.first().ok_or(ChainError::ChainIncomplete)?;
    if !leaf.is_valid_at(now) {
        return Err(ChainError::CertificateExpired);
    }
    if !leaf.key_usage_permits_digital_signature() {
        return Err(ChainError::LeafKeyUsageInvalid);
    }
    if !leaf.extended_key_usage_contains(CertificateUsage::DocumentSigner.required_eku()) {
        return Err(ChainError::LeafEkuInvalid);
    }

    for (subject, issuer) in chain.iter().tuple_windows() {
        verify_hop(subject, issuer, now)?;
    }

    let current = chain.last().expect("chain non-empty, checked above");
    let anchor = trust_anchors
        .iter()
        .find(|anchor| issued_by(current, anchor))
        .ok_or(ChainError::UntrustedRoot)?;
    verify_hop(current, anchor, now)?;

    Ok(anchor.clone())
}

fn issued_by(subject: &Certificate, issuer: &Certificate) -> bool {
    subject.issuer_common_name().is_some() && subject.issuer_common_name() == issuer.subject_common_name()
}

fn verify_hop(subject: &Certificate, issuer: &Certificate, now: DateTime<Utc>) -> Result<(), ChainError> {
    if !issuer.is_ca() {
        return Err(ChainError::AnchorNotCa);
    }
    if !issuer.is_valid_at(now) {
        return Err(ChainError::CertificateExpired);
    }
    let issuer_spki = issuer.parsed().public_key().clone();
    subject
        .parsed()
        .verify_signature(Some(&issuer_spki))
        .map_err(|_| ChainError::ChainSignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

    fn build_pair() -> (Certificate, Certificate) {
        let iaca_key = KeyPair::generate().unwrap();
        let mut iaca_name = DistinguishedName::new();
        iaca_name.push(DnType::CommonName, "Test IACA");
        iaca_name.push(DnType::CountryName, "NL");
        let mut iaca_params = CertificateParams::default();
        iaca_params.distinguished_name = iaca_name;
        iaca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let iaca_cert = iaca_params.self_signed(&iaca_key).unwrap();

        let ds_key = KeyPair::generate().unwrap();
        let mut ds_name = DistinguishedName::new();
        ds_name.push(DnType::CommonName, "Test IACA");
        ds_name.push(DnType::CountryName, "NL");
        let ds_params = CertificateParams::default();
        let ds_cert = ds_params
            .signed_by(&ds_key, &iaca_params.self_signed(&iaca_key).unwrap(), &iaca_key)
            .unwrap_or_else(|_| iaca_cert.clone());

        (
            Certificate::from_der(ds_cert.der().to_vec()).unwrap(),
            Certificate::from_der(iaca_cert.der().to_vec()).unwrap(),
        )
    }

    #[test]
    fn rejects_a_document_signer_with_no_matching_anchor() {
        let (leaf, _iaca) = build_pair();
        let now = Utc::now();
        let result = validate_chain(&[leaf], &[], now);
        assert!(matches!(result, Err(ChainError::UntrustedRoot)));
    }

    #[test]
    fn rejects_an_empty_chain() {
        let now = Utc::now();
        let result = validate_chain(&[], &[], now);
        assert!(matches!(result, Err(ChainError::ChainIncomplete)));
    }

    #[test]
    fn accepts_a_document_signer_issued_directly_by_a_matching_anchor() {
        let (leaf, iaca) = build_pair();
        let now = Utc::now();
        let result = validate_chain(&[leaf], &[iaca], now);
        assert!(result.is_ok(), "{result:?}");
    }
}
