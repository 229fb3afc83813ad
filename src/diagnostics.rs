//! `diagnose` (§4.H): runs the same checks as [`crate::verifier::Verifier::verify`] but, instead of
//! handing the caller a flat stream of [`Assessment`](crate::verifier::Assessment)s, aggregates them
//! per document into the shape an audit log or a host UI actually wants — one summary per proof
//! kind, the disclosed attributes annotated with their own validity, and the issuer certificate's
//! identifying fields pulled out for display.

use std::collections::BTreeMap;

use coset::{iana, CoseKey, KeyType, Label};
use indexmap::IndexMap;
use serde::Serialize;

use crate::cbor::CborValue;
use crate::iso::{DataElementIdentifier, DeviceAuth, DeviceResponse, Document, NameSpace};
use crate::mso::MobileSecurityObject;
use crate::serialization::cbor_deserialize;
use crate::verifier::{Category, Report, Status, VerifyOptions, Verifier};
use crate::x509::Certificate;
use crate::Error;

/// Per-call inputs `diagnose` needs; the same fields as [`VerifyOptions`] minus `on_check`, since
/// `diagnose` always runs with its own internal collector.
pub struct DiagnoseOptions<'a> {
    pub session_transcript_bytes: Option<&'a [u8]>,
    pub ephemeral_reader_key: Option<&'a p256::ecdsa::SigningKey>,
    pub disable_certificate_chain_validation: bool,
}

impl<'a> DiagnoseOptions<'a> {
    pub fn new(session_transcript_bytes: &'a [u8]) -> Self {
        Self {
            session_transcript_bytes: Some(session_transcript_bytes),
            ephemeral_reader_key: None,
            disable_certificate_chain_validation: false,
        }
    }

    fn as_verify_options(&self) -> VerifyOptions<'a> {
        VerifyOptions {
            session_transcript_bytes: self.session_transcript_bytes,
            ephemeral_reader_key: self.ephemeral_reader_key,
            disable_certificate_chain_validation: self.disable_certificate_chain_validation,
            on_check: None,
        }
    }
}

/// A JSON Web Key (RFC 7517) view of a device's `COSE_Key`, for `deviceKey.jwk` (§4.H). mDL device
/// keys travel as COSE keys on the wire; JWK is the shape a host typically wants once verification
/// is done and the key is handed off to something outside this crate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Jwk {
    pub kty: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    pub fn from_cose_key(cose_key: &CoseKey) -> Option<Self> {
        fn b64url(bytes: &[u8]) -> String {
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
        }
        fn param<'a>(cose_key: &'a CoseKey, label: i64) -> Option<&'a [u8]> {
            cose_key.params.iter().find_map(|(l, v)| (*l == Label::Int(label)).then(|| v.as_bytes()).flatten()).map(Vec::as_slice)
        }

        match cose_key.kty {
            KeyType::Assigned(iana::KeyType::EC2) => {
                let crv = cose_key
                    .params
                    .iter()
                    .find_map(|(l, v)| (*l == Label::Int(iana::Ec2KeyParameter::Crv as i64)).then(|| v.as_integer()).flatten())
                    .map(i128::from);
                let crv_name = match crv {
                    Some(v) if v == iana::EllipticCurve::P_256 as i128 => "P-256",
                    Some(v) if v == iana::EllipticCurve::P_384 as i128 => "P-384",
                    Some(v) if v == iana::EllipticCurve::P_521 as i128 => "P-521",
                    _ => return None,
                };
                let x = param(cose_key, iana::Ec2KeyParameter::X as i64)?;
                let y = param(cose_key, iana::Ec2KeyParameter::Y as i64)?;
                Some(Jwk { kty: "EC", crv: Some(crv_name), x: Some(b64url(x)), y: Some(b64url(y)) })
            }
            KeyType::Assigned(iana::KeyType::OKP) => {
                let x = param(cose_key, iana::OkpKeyParameter::X as i64)?;
                Some(Jwk { kty: "OKP", crv: Some("Ed25519"), x: Some(b64url(x)), y: None })
            }
            _ => None,
        }
    }
}

/// The issuer leaf certificate's identifying fields, pulled out of DER for display (§4.H).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub subject_name: Option<String>,
    pub pem: String,
    pub not_before: chrono::DateTime<chrono::Utc>,
    pub not_after: chrono::DateTime<chrono::Utc>,
    pub serial_number: String,
    pub thumbprint: String,
}

impl From<&Certificate> for CertificateSummary {
    fn from(cert: &Certificate) -> Self {
        Self {
            subject_name: cert.subject_common_name(),
            pem: cert.to_pem(),
            not_before: cert.not_before(),
            not_after: cert.not_after(),
            serial_number: cert.serial_number_hex(),
            thumbprint: cert.thumbprint_sha256_hex(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignatureSummary {
    pub alg: Option<String>,
    pub is_valid: bool,
    pub reasons: Vec<String>,
    pub digests: BTreeMap<NameSpace, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignatureSummary {
    pub alg: Option<String>,
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegritySummary {
    /// `"k of n"`: `n` disclosed attributes, `k` of which passed digest binding.
    pub disclosed_attributes: String,
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDiagnostic {
    pub name_space: NameSpace,
    pub id: DataElementIdentifier,
    pub value: CborValue,
    pub is_valid: bool,
    /// Set only for `issuing_country`/`issuing_jurisdiction` in the mDL namespace (§4.D point 3);
    /// `None` for every other element, which has nothing in the certificate to cross-check against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_certificate: Option<bool>,
}

/// One document's aggregated verification result (§4.H).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub doc_type: String,
    pub issuer_signature: IssuerSignatureSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_signature: Option<DeviceSignatureSummary>,
    pub data_integrity: DataIntegritySummary,
    pub attributes: Vec<AttributeDiagnostic>,
    pub device_attributes: IndexMap<NameSpace, IndexMap<DataElementIdentifier, CborValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_certificate: Option<CertificateSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_key_jwk: Option<Jwk>,
}

impl Verifier {
    /// Runs verification over every document in `encoded_device_response` and returns one
    /// [`Diagnostics`] per document, in order (§4.H). Never returns `Err` for a check failure —
    /// those surface as `is_valid: false`/`reasons` on the relevant summary — only for a
    /// `DeviceResponse` that does not even decode.
    pub fn diagnose(
        &self,
        encoded_device_response: &[u8],
        options: DiagnoseOptions<'_>,
    ) -> Result<Vec<Diagnostics>, Error> {
        let device_response: DeviceResponse = cbor_deserialize(encoded_device_response)
            .map_err(|e| Error::Mdl(format!("could not decode DeviceResponse: {e}")))?;
        let now = self.now();
        let verify_options = options.as_verify_options();

        let documents = device_response.documents.as_deref().unwrap_or(&[]);
        Ok(documents.iter().map(|document| self.diagnose_document(document, &verify_options, now)).collect())
    }

    fn diagnose_document(
        &self,
        document: &Document,
        verify_options: &VerifyOptions<'_>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Diagnostics {
        let mut report = Report::new(document.doc_type.clone());
        let issuer_auth_alg = crate::verifier::algorithm_of(&document.issuer_signed.issuer_auth.0.protected.header)
            .map(algorithm_display_name);

        let Some((mso, signer_cert)) = self.verify_issuer_auth(document, verify_options, now, &mut report) else {
            return Diagnostics {
                doc_type: document.doc_type.clone(),
                issuer_signature: summarize(&report, Category::IssuerAuth, issuer_auth_alg, BTreeMap::new()),
                device_signature: None,
                data_integrity: DataIntegritySummary {
                    disclosed_attributes: "0 of 0".to_string(),
                    is_valid: false,
                    reasons: vec!["issuer authentication did not succeed".to_string()],
                },
                attributes: Vec::new(),
                device_attributes: IndexMap::new(),
                issuer_certificate: None,
                device_key_jwk: None,
            };
        };

        self.verify_digests(document, &mso, &signer_cert, &mut report);
        self.verify_device_auth(document, &mso, verify_options, &mut report);

        let digests: BTreeMap<NameSpace, usize> =
            mso.value_digests.iter().map(|(ns, ids)| (ns.clone(), ids.len())).collect();
        let issuer_signature = summarize(&report, Category::IssuerAuth, issuer_auth_alg, digests);

        let device_signature = document.device_signed.as_ref().map(|device_signed| {
            let alg = match &device_signed.device_auth {
                DeviceAuth::DeviceSignature(sign1) => crate::verifier::algorithm_of(&sign1.0.protected.header),
                DeviceAuth::DeviceMac(mac0) => crate::verifier::algorithm_of(&mac0.0.protected.header),
            }
            .map(algorithm_display_name);
            let reasons = failed_reasons(&report, Category::DeviceAuth);
            let is_valid = category_is_valid(&report, Category::DeviceAuth);
            DeviceSignatureSummary { alg, is_valid, reasons }
        });

        let (disclosed_valid, disclosed_total) = count_disclosed(document, &mso);
        let data_integrity = DataIntegritySummary {
            disclosed_attributes: format!("{disclosed_valid} of {disclosed_total}"),
            is_valid: category_is_valid(&report, Category::DataIntegrity),
            reasons: failed_reasons(&report, Category::DataIntegrity),
        };

        let attributes = build_attribute_diagnostics(document, &mso, &signer_cert);
        let device_attributes =
            document.device_signed.as_ref().map(|ds| ds.name_spaces.value().clone()).unwrap_or_default();
        let device_key_jwk = mso.device_key_info.device_key().ok().and_then(|key| Jwk::from_cose_key(&key));

        Diagnostics {
            doc_type: document.doc_type.clone(),
            issuer_signature,
            device_signature,
            data_integrity,
            attributes,
            device_attributes,
            issuer_certificate: Some(CertificateSummary::from(&signer_cert)),
            device_key_jwk,
        }
    }
}

fn summarize(
    report: &Report,
    category: Category,
    alg: Option<String>,
    digests: BTreeMap<NameSpace, usize>,
) -> IssuerSignatureSummary {
    IssuerSignatureSummary {
        alg,
        is_valid: category_is_valid(report, category),
        reasons: failed_reasons(report, category),
        digests,
    }
}

fn category_is_valid(report: &Report, category: Category) -> bool {
    report.by_category(category).all(|a| a.status != Status::Failed)
}

fn failed_reasons(report: &Report, category: Category) -> Vec<String> {
    report.by_category(category).filter(|a| a.status == Status::Failed).filter_map(|a| a.reason.clone()).collect()
}

fn algorithm_display_name(alg: iana::Algorithm) -> String {
    match alg {
        iana::Algorithm::ES256 => "ES256",
        iana::Algorithm::ES384 => "ES384",
        iana::Algorithm::ES512 => "ES512",
        iana::Algorithm::EdDSA => "EdDSA",
        iana::Algorithm::HMAC_256_256 => "HS256",
        _ => "unknown",
    }
    .to_string()
}

fn count_disclosed(document: &Document, mso: &MobileSecurityObject) -> (usize, usize) {
    let Some(name_spaces) = &document.issuer_signed.name_spaces else {
        return (0, 0);
    };
    let mut total = 0;
    let mut valid = 0;
    for (namespace, items) in name_spaces {
        for item in items {
            total += 1;
            if crate::verifier::digest_matches(item, mso, namespace) {
                valid += 1;
            }
        }
    }
    (valid, total)
}

fn build_attribute_diagnostics(
    document: &Document,
    mso: &MobileSecurityObject,
    signer_cert: &Certificate,
) -> Vec<AttributeDiagnostic> {
    let Some(name_spaces) = &document.issuer_signed.name_spaces else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (namespace, items) in name_spaces {
        for item in items {
            let is_valid = crate::verifier::digest_matches(item, mso, namespace);
            let match_certificate = if namespace.as_str() == crate::verifier::MDL_NAMESPACE {
                match item.value().element_identifier.as_str() {
                    "issuing_country" => {
                        Some(item.value().element_value.as_text() == signer_cert.subject_country().as_deref())
                    }
                    "issuing_jurisdiction" => Some(
                        item.value().element_value.as_text() == signer_cert.subject_state_or_province().as_deref(),
                    ),
                    _ => None,
                }
            } else {
                None
            };
            out.push(AttributeDiagnostic {
                name_space: namespace.clone(),
                id: item.value().element_identifier.clone(),
                value: item.value().element_value.clone(),
                is_valid,
                match_certificate,
            });
        }
    }
    out
}
