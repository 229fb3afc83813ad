//! Certificate parsing and chain validation, grounded on the teacher's `utils::x509` module but
//! narrowed to what the verifier needs: parse a DER certificate, read the fields the diagnostics
//! report surfaces (§4.H), and validate an issuer signer certificate against a set of IACA trust
//! anchors (§4.C).

mod chain;
#[cfg(feature = "mock")]
pub mod mock;

pub use chain::{validate_chain, ChainError};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::{FromDer, X509Error};

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate is not valid DER: {0}")]
    InvalidDer(#[from] x509_parser::nom::Err<X509Error>),
    #[error("certificate extension could not be decoded: {0}")]
    Extension(String),
}

/// The two roles a certificate can play in an mDL trust chain (§4.C), distinguished by extended
/// key usage per ISO/IEC 18013-5 Annex B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateUsage {
    /// IACA (Issuing Authority Certificate Authority) root, self-signed or cross-signed.
    Iaca,
    /// Document signer certificate, issued by an IACA and used to sign `IssuerAuth`.
    DocumentSigner,
}

impl CertificateUsage {
    /// Extended key usage OID mandated for this role by ISO/IEC 18013-5 Annex B.
    pub fn required_eku(self) -> &'static str {
        match self {
            CertificateUsage::Iaca => "2.5.29.32", // not separately EKU-gated; kept for symmetry
            CertificateUsage::DocumentSigner => "1.0.18013.5.1.2",
        }
    }
}

/// A parsed X.509 certificate, retained in DER form so it can be re-parsed against a borrow of
/// itself without a self-referential struct.
#[derive(Debug, Clone, derive_more::AsRef)]
pub struct Certificate {
    #[as_ref]
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: Vec<u8>) -> Result<Self, CertificateError> {
        let _ = X509Certificate::from_der(&der)?;
        Ok(Self { der })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn parsed(&self) -> X509Certificate<'_> {
        X509Certificate::from_der(&self.der)
            .expect("DER validated at construction")
            .1
    }

    pub fn subject_common_name(&self) -> Option<String> {
        dn_attribute(&self.parsed().subject(), "CN")
    }

    pub fn issuer_common_name(&self) -> Option<String> {
        dn_attribute(&self.parsed().issuer(), "CN")
    }

    pub fn subject_country(&self) -> Option<String> {
        dn_attribute(&self.parsed().subject(), "C")
    }

    pub fn subject_state_or_province(&self) -> Option<String> {
        dn_attribute(&self.parsed().subject(), "ST")
    }

    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        let validity = self.parsed().validity().clone();
        let secs = time.timestamp();
        validity.not_before.timestamp() <= secs && secs <= validity.not_after.timestamp()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.parsed().validity().not_before.timestamp(), 0).unwrap_or_default()
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.parsed().validity().not_after.timestamp(), 0).unwrap_or_default()
    }

    pub fn is_ca(&self) -> bool {
        self.parsed()
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false)
    }

    /// Whether this certificate's keyUsage extension, if present, permits `digitalSignature`
    /// (§4.C requires this of the document signer certificate). A certificate carrying no
    /// keyUsage extension at all is treated as unconstrained, matching the lenient
    /// extension-absent-means-unset handling already used by [`Certificate::is_ca`].
    pub fn key_usage_permits_digital_signature(&self) -> bool {
        match self.parsed().key_usage() {
            Some(Ok(ku)) => ku.value.digital_signature(),
            _ => true,
        }
    }

    /// Whether this certificate's extended key usage extension, if present, names `oid`. Used to
    /// check the document signer EKU (`CertificateUsage::DocumentSigner::required_eku`) mandated
    /// by ISO/IEC 18013-5 Annex B; an absent extension is treated as unconstrained.
    pub fn extended_key_usage_contains(&self, oid: &str) -> bool {
        match self.parsed().extended_key_usage() {
            Some(Ok(eku)) => eku.value.other.iter().any(|o| o.to_id_string() == oid),
            _ => true,
        }
    }

    /// The raw SubjectPublicKeyInfo bytes (uncompressed EC point, or raw OKP key), used together
    /// with the `issuerAuth`/`deviceSignature` `alg` header to pick the right curve (§4.B).
    pub fn spki_bytes(&self) -> Vec<u8> {
        self.parsed().public_key().subject_public_key.as_ref().to_vec()
    }

    pub fn serial_number_hex(&self) -> String {
        self.parsed().raw_serial_as_string()
    }

    pub fn to_pem(&self) -> String {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.der);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for chunk in encoded.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    pub fn thumbprint_sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(self.der()))
    }
}

fn dn_attribute(dn: &x509_parser::x509::X509Name<'_>, short_name: &str) -> Option<String> {
    dn.iter_attributes().find_map(|attr| {
        let oid_short = match attr.attr_type().to_id_string().as_str() {
            "2.5.4.3" => "CN",
            "2.5.4.6" => "C",
            "2.5.4.8" => "ST",
            _ => return None,
        };
        (oid_short == short_name)
            .then(|| attr.as_str().ok())
            .flatten()
            .map(str::to_owned)
    })
}
