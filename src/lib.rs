//! Verifier for ISO/IEC 18013-5 mobile driving licence (mDL) `DeviceResponse` documents:
//! CBOR/COSE decoding, issuer certificate chain validation, device authentication, and
//! MSO digest binding, reported as a structured set of per-document diagnostics.

pub mod cbor;
pub mod cose;
pub mod crypto;
pub mod diagnostics;
pub mod generator;
pub mod iso;
pub mod mso;
pub mod serialization;
pub mod transcript;
pub mod verifier;
pub mod x509;

pub use diagnostics::{Diagnostics, DiagnoseOptions};
pub use verifier::{Assessment, Category, Report, Status, VerifyOptions, Verifier};

/// The crate's aggregate error type. Most call sites instead see individual [`Assessment`]s; this
/// surfaces only decode failures that precede any per-document check, and the fail-fast wrapper
/// [`Error::Mdl`] used when [`VerifyOptions::on_check`] is not set (§4.G/§6).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cbor(#[from] cbor::CborError),
    #[error(transparent)]
    Serialization(#[from] serialization::CborError),
    #[error(transparent)]
    Cose(#[from] cose::CoseError),
    #[error(transparent)]
    Key(#[from] cose::KeyError),
    #[error(transparent)]
    Certificate(#[from] x509::CertificateError),
    #[error(transparent)]
    Chain(#[from] x509::ChainError),
    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),
    #[error("{0}")]
    Mdl(String),
}
