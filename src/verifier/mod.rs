//! Orchestrates the per-document verification state machine (§4.G), grounded on the teacher's
//! `DeviceResponse::verify`/`Document::verify`, generalized from a single fail-fast `Result` into
//! the Assessment-based diagnostic reporting the spec requires (§4.H).

mod report;

pub use report::{Assessment, AssessmentSink, Category, CollectingSink, Report, Status};

use chrono::{DateTime, Utc};
use coset::iana;
use p256::ecdsa::SigningKey;
use tracing::{debug, warn};

use crate::crypto::{derive_emac_key, digest};
use crate::generator::{Generator, SystemTimeGenerator};
use crate::iso::{DeviceAuth, DeviceResponse, Document, IssuerSignedItemBytes, MobileSecurityObjectBytes};
use crate::mso::MobileSecurityObject;
use crate::serialization::cbor_deserialize;
use crate::transcript::device_authentication_bytes;
use crate::x509::{validate_chain, Certificate};
use crate::Error;

/// Namespace carrying the two self-describing elements cross-checked against the issuer
/// certificate's subject (§4.D point 3).
pub(crate) const MDL_NAMESPACE: &str = "org.iso.18013.5.1";

/// Inputs that vary per verification call: the transport-level binding (`SessionTranscript`) and
/// the ephemeral reader key needed for `DeviceMac` (§6).
pub struct VerifyOptions<'a> {
    /// The already-CBOR-encoded `SessionTranscript` this presentation was bound to. `None` fails
    /// every document's device authentication check (§4.G DEVICE_AUTH precondition).
    pub session_transcript_bytes: Option<&'a [u8]>,
    /// Required only when a document uses `DeviceMac` rather than `DeviceSignature`.
    pub ephemeral_reader_key: Option<&'a SigningKey>,
    /// Skips §4.C chain validation, for presentations whose trust is established out of band.
    pub disable_certificate_chain_validation: bool,
    /// Receives every [`Assessment`] as it's produced, in Collect mode (§4.G); when `None`, the
    /// orchestrator runs in fail-fast mode and returns the first `FAILED` assessment as an
    /// [`Error::Mdl`].
    pub on_check: Option<&'a mut dyn AssessmentSink>,
}

impl<'a> VerifyOptions<'a> {
    pub fn new(session_transcript_bytes: &'a [u8]) -> Self {
        Self {
            session_transcript_bytes: Some(session_transcript_bytes),
            ephemeral_reader_key: None,
            disable_certificate_chain_validation: false,
            on_check: None,
        }
    }

    /// Builds options with no `SessionTranscript` supplied at all, exercising the DEVICE_AUTH
    /// precondition that requires one.
    pub fn without_session_transcript() -> Self {
        Self {
            session_transcript_bytes: None,
            ephemeral_reader_key: None,
            disable_certificate_chain_validation: false,
            on_check: None,
        }
    }
}

pub struct Verifier {
    trust_anchors: Vec<Certificate>,
    time_generator: Box<dyn Generator<DateTime<Utc>>>,
}

impl Verifier {
    pub fn new(trust_anchors: Vec<Certificate>) -> Self {
        Self { trust_anchors, time_generator: Box::new(SystemTimeGenerator) }
    }

    pub fn with_generator(
        trust_anchors: Vec<Certificate>,
        time_generator: impl Generator<DateTime<Utc>> + 'static,
    ) -> Self {
        Self { trust_anchors, time_generator: Box::new(time_generator) }
    }

    pub fn trust_anchors(&self) -> &[Certificate] {
        &self.trust_anchors
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.time_generator.generate()
    }

    pub fn verify(
        &self,
        encoded_device_response: &[u8],
        mut options: VerifyOptions<'_>,
    ) -> Result<DeviceResponse, Error> {
        debug!("verifying DeviceResponse ({} bytes)", encoded_device_response.len());
        let device_response: DeviceResponse = cbor_deserialize(encoded_device_response)
            .map_err(|e| Error::Mdl(format!("could not decode DeviceResponse: {e}")))?;

        let now = self.time_generator.generate();

        let mut format_report = Report::new(String::new());
        if device_response.version.as_str() < "1.0" {
            format_report.assessments.push(Assessment::failed(
                Category::DocumentFormat,
                "version_at_least_1_0",
                format!("DeviceResponse version {} is below the minimum 1.0", device_response.version),
            ));
        } else {
            format_report.assessments.push(Assessment::passed(Category::DocumentFormat, "version_at_least_1_0"));
        }

        let documents = device_response.documents.as_deref().unwrap_or(&[]);
        if documents.is_empty() {
            format_report.assessments.push(Assessment::failed(
                Category::DocumentFormat,
                "documents_non_empty",
                "DeviceResponse contains no documents",
            ));
        } else {
            format_report.assessments.push(Assessment::passed(Category::DocumentFormat, "documents_non_empty"));
        }

        self.dispatch(&mut options, format_report.assessments.iter().cloned())?;
        if options.on_check.is_none() {
            if let Some(failure) = format_report.first_failure() {
                return Err(self.fail_fast_error(failure, &options));
            }
        }

        for document in documents {
            let mut report = Report::new(document.doc_type.clone());
            self.verify_document(document, &options, now, &mut report);

            self.dispatch(&mut options, report.assessments.iter().cloned())?;

            if options.on_check.is_none() {
                if let Some(failure) = report.first_failure() {
                    return Err(self.fail_fast_error(failure, &options));
                }
            }
        }

        Ok(device_response)
    }

    fn dispatch(
        &self,
        options: &mut VerifyOptions<'_>,
        assessments: impl Iterator<Item = Assessment>,
    ) -> Result<(), Error> {
        if let Some(sink) = options.on_check.as_mut() {
            for assessment in assessments {
                sink.record(assessment);
            }
        }
        Ok(())
    }

    fn fail_fast_error(&self, failure: &Assessment, _options: &VerifyOptions<'_>) -> Error {
        let reason = failure.reason.clone().unwrap_or_default();
        warn!("{} check '{}' failed: {reason}", failure.category, failure.check);
        Error::Mdl(format!("{} check '{}' failed: {reason}", failure.category, failure.check))
    }

    fn verify_document(
        &self,
        document: &Document,
        options: &VerifyOptions<'_>,
        now: DateTime<Utc>,
        report: &mut Report,
    ) {
        debug!("verifying document with doc_type: {}", document.doc_type);
        let Some((mso, signer_cert)) = self.verify_issuer_auth(document, options, now, report) else {
            return;
        };

        if mso.doc_type != document.doc_type {
            report.assessments.push(Assessment::failed(
                Category::DocumentFormat,
                "doc_type_matches_mso",
                format!("document docType {} != MSO docType {}", document.doc_type, mso.doc_type),
            ));
        } else {
            report.assessments.push(Assessment::passed(Category::DocumentFormat, "doc_type_matches_mso"));
        }

        self.verify_digests(document, &mso, &signer_cert, report);
        self.verify_device_auth(document, &mso, options, report);
    }

    /// §4.G step 1 (ISSUER_AUTH). Returns the decoded MSO and signer certificate on success, so
    /// later steps don't have to re-derive them; `None` means a precondition failed badly enough
    /// that device-auth/data-integrity checks would be meaningless.
    pub(crate) fn verify_issuer_auth(
        &self,
        document: &Document,
        options: &VerifyOptions<'_>,
        now: DateTime<Utc>,
        report: &mut Report,
    ) -> Option<(MobileSecurityObject, Certificate)> {
        let issuer_auth = &document.issuer_signed.issuer_auth;

        let x5chain =
            x5chain_certificates(&issuer_auth.0.unprotected.rest, &issuer_auth.0.protected.header.rest);
        if x5chain.is_empty() {
            report.assessments.push(Assessment::failed(
                Category::IssuerAuth,
                "certificate_chain_present",
                "Issuer certificate must be valid",
            ));
            return None;
        }
        let chain: Result<Vec<Certificate>, _> =
            x5chain.into_iter().map(Certificate::from_der).collect();
        let chain = match chain {
            Ok(chain) => chain,
            Err(e) => {
                report.assessments.push(Assessment::failed(Category::IssuerAuth, "certificate_parses", e.to_string()));
                return None;
            }
        };
        let signer_cert = chain[0].clone();

        if options.disable_certificate_chain_validation {
            report.assessments.push(Assessment::warning(
                Category::IssuerAuth,
                "certificate_chain_to_trust_anchor",
                "chain validation disabled by caller",
            ));
        } else {
            match validate_chain(&chain, &self.trust_anchors, now) {
                Ok(_anchor) => {
                    report
                        .assessments
                        .push(Assessment::passed(Category::IssuerAuth, "certificate_chain_to_trust_anchor"));
                }
                Err(e) => {
                    report.assessments.push(Assessment::failed(
                        Category::IssuerAuth,
                        "certificate_chain_to_trust_anchor",
                        e.to_string(),
                    ));
                    return None;
                }
            }
        }

        let alg = match algorithm_of(&issuer_auth.0.protected.header) {
            Some(alg) => alg,
            None => {
                report.assessments.push(Assessment::failed(
                    Category::IssuerAuth,
                    "issuer_auth_signature",
                    "protected header does not name a supported algorithm",
                ));
                return None;
            }
        };
        let signer_key = match crate::cose::VerifyingKey::from_spki(alg, &signer_cert.spki_bytes()) {
            Ok(key) => key,
            Err(e) => {
                report.assessments.push(Assessment::failed(
                    Category::IssuerAuth,
                    "issuer_certificate_key_supported",
                    e.to_string(),
                ));
                return None;
            }
        };
        let signer_cose_key = coset::CoseKey::from(&signer_key);
        match issuer_auth.verify(&signer_cose_key) {
            Ok(()) => report.assessments.push(Assessment::passed(Category::IssuerAuth, "issuer_auth_signature")),
            Err(e) => {
                report
                    .assessments
                    .push(Assessment::failed(Category::IssuerAuth, "issuer_auth_signature", e.to_string()));
                return None;
            }
        }

        let mso = self.decode_mso(issuer_auth, report)?;

        if signer_cert.is_valid_at(mso.validity_info.signed.0) {
            report.assessments.push(Assessment::passed(Category::IssuerAuth, "mso_signed_within_certificate_validity"));
        } else {
            report.assessments.push(Assessment::failed(
                Category::IssuerAuth,
                "mso_signed_within_certificate_validity",
                format!(
                    "MSO signed at {} is outside the signer certificate's [{}, {}]",
                    mso.validity_info.signed.0,
                    signer_cert.not_before(),
                    signer_cert.not_after()
                ),
            ));
        }

        if mso.validity_info.is_valid_at(now) {
            report.assessments.push(Assessment::passed(Category::IssuerAuth, "mso_validity_window"));
        } else {
            report.assessments.push(Assessment::failed(
                Category::IssuerAuth,
                "mso_validity_window",
                format!(
                    "MSO must be valid at the time of verification: {now} is outside [{}, {}]",
                    mso.validity_info.valid_from.0, mso.validity_info.valid_until.0
                ),
            ));
        }

        if signer_cert.subject_country().is_some() {
            report.assessments.push(Assessment::passed(Category::IssuerAuth, "subject_country_present"));
        } else {
            report.assessments.push(Assessment::failed(
                Category::IssuerAuth,
                "subject_country_present",
                "issuer certificate subject carries no countryName (C)",
            ));
        }

        Some((mso, signer_cert))
    }

    /// `issuerAuth`'s COSE_Sign1 payload is itself the encoded `MobileSecurityObjectBytes`
    /// (`#6.24(bstr .cbor MobileSecurityObject)`), so it decodes straight through the same
    /// [`crate::serialization::TaggedBytes`] machinery every other tag-24 field uses.
    fn decode_mso(&self, issuer_auth: &crate::cose::MdocCoseSign1, report: &mut Report) -> Option<MobileSecurityObject> {
        let Some(payload) = issuer_auth.payload() else {
            report.assessments.push(Assessment::failed(
                Category::DocumentFormat,
                "issuer_auth_payload_present",
                "issuerAuth carries no payload",
            ));
            return None;
        };
        match cbor_deserialize::<MobileSecurityObjectBytes>(payload) {
            Ok(tagged) => Some(tagged.into_value()),
            Err(e) => {
                report.assessments.push(Assessment::failed(Category::DocumentFormat, "mso_decodes", e.to_string()));
                None
            }
        }
    }

    /// §4.D: digest binding plus the `org.iso.18013.5.1` country/jurisdiction cross-check.
    pub(crate) fn verify_digests(
        &self,
        document: &Document,
        mso: &MobileSecurityObject,
        signer_cert: &Certificate,
        report: &mut Report,
    ) {
        let Some(name_spaces) = &document.issuer_signed.name_spaces else {
            report
                .assessments
                .push(Assessment::warning(Category::DataIntegrity, "attribute_digests", "no disclosed attributes"));
            return;
        };

        for namespace in name_spaces.keys() {
            if mso.value_digests.contains_key(namespace) {
                report
                    .assessments
                    .push(Assessment::passed(Category::DataIntegrity, "namespace_present_in_value_digests"));
            } else {
                report.assessments.push(Assessment::failed(
                    Category::DataIntegrity,
                    "namespace_present_in_value_digests",
                    format!("namespace {namespace} is disclosed but has no entry in valueDigests"),
                ));
            }
        }

        let mut any_checked = false;
        let mut all_matched = true;
        for (namespace, items) in name_spaces {
            for item in items {
                any_checked = true;
                if digest_matches(item, mso, namespace) {
                    continue;
                }
                all_matched = false;
                report.assessments.push(Assessment::failed(
                    Category::DataIntegrity,
                    "attribute_digest",
                    format!("digest mismatch for {namespace}/{}", item.value().element_identifier),
                ));
            }
        }
        if any_checked && all_matched {
            report.assessments.push(Assessment::passed(Category::DataIntegrity, "attribute_digests"));
        }

        if let Some(items) = name_spaces.get(MDL_NAMESPACE) {
            self.verify_mdl_namespace_cross_checks(items, signer_cert, report);
        }
    }

    /// §4.D point 3: `issuing_country`/`issuing_jurisdiction` must match the issuer leaf's
    /// subject, with the jurisdiction policy resolved in SPEC_FULL §4.D/§9 ("PASSED only if both
    /// present and equal, or both absent; otherwise WARNING").
    fn verify_mdl_namespace_cross_checks(
        &self,
        items: &[IssuerSignedItemBytes],
        signer_cert: &Certificate,
        report: &mut Report,
    ) {
        let issuing_country = items
            .iter()
            .find(|item| item.value().element_identifier == "issuing_country")
            .and_then(|item| item.value().element_value.as_text().map(str::to_owned));
        let issuing_jurisdiction = items
            .iter()
            .find(|item| item.value().element_identifier == "issuing_jurisdiction")
            .and_then(|item| item.value().element_value.as_text().map(str::to_owned));

        if let Some(issuing_country) = issuing_country {
            let cert_country = signer_cert.subject_country();
            match &cert_country {
                Some(cert_country) if *cert_country == issuing_country => {
                    report.assessments.push(Assessment::passed(Category::DataIntegrity, "issuing_country_matches_certificate"));
                }
                _ => {
                    report.assessments.push(Assessment::failed(
                        Category::DataIntegrity,
                        "issuing_country_matches_certificate",
                        format!(
                            "disclosed issuing_country {issuing_country} does not match certificate countryName {}",
                            cert_country.as_deref().unwrap_or("<absent>")
                        ),
                    ));
                }
            }
        }

        let cert_jurisdiction = signer_cert.subject_state_or_province();
        match (&issuing_jurisdiction, &cert_jurisdiction) {
            (None, None) => {
                report.assessments.push(Assessment::passed(Category::DataIntegrity, "issuing_jurisdiction_matches_certificate"));
            }
            (Some(jurisdiction), Some(cert_jurisdiction)) if jurisdiction == cert_jurisdiction => {
                report.assessments.push(Assessment::passed(Category::DataIntegrity, "issuing_jurisdiction_matches_certificate"));
            }
            (Some(jurisdiction), cert_jurisdiction) => {
                report.assessments.push(Assessment::warning(
                    Category::DataIntegrity,
                    "issuing_jurisdiction_matches_certificate",
                    format!(
                        "disclosed issuing_jurisdiction {jurisdiction} vs certificate stateOrProvinceName {}",
                        cert_jurisdiction.as_deref().unwrap_or("<absent>")
                    ),
                ));
            }
            (None, Some(cert_jurisdiction)) => {
                report.assessments.push(Assessment::warning(
                    Category::DataIntegrity,
                    "issuing_jurisdiction_matches_certificate",
                    format!("certificate carries stateOrProvinceName {cert_jurisdiction} but issuing_jurisdiction was not disclosed"),
                ));
            }
        }
    }

    /// §4.G step 2 (DEVICE_AUTH).
    pub(crate) fn verify_device_auth(
        &self,
        document: &Document,
        mso: &MobileSecurityObject,
        options: &VerifyOptions<'_>,
        report: &mut Report,
    ) {
        let Some(device_signed) = &document.device_signed else {
            report.assessments.push(Assessment::failed(
                Category::DeviceAuth,
                "device_signed_present",
                "document is not signed by the device",
            ));
            return;
        };

        report.assessments.push(Assessment::passed(Category::DeviceAuth, "exactly_one_proof_kind"));

        let device_key = match mso.device_key_info.device_key() {
            Ok(key) => key,
            Err(e) => {
                report.assessments.push(Assessment::failed(Category::DeviceAuth, "device_key_present", e.to_string()));
                return;
            }
        };
        report.assessments.push(Assessment::passed(Category::DeviceAuth, "device_key_present"));

        let Some(session_transcript_bytes) = options.session_transcript_bytes else {
            report.assessments.push(Assessment::failed(
                Category::DeviceAuth,
                "session_transcript_present",
                "SessionTranscriptBytes must be present",
            ));
            return;
        };

        let tbs = match device_authentication_bytes(
            session_transcript_bytes,
            &document.doc_type,
            &device_signed.name_spaces,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                report
                    .assessments
                    .push(Assessment::failed(Category::DeviceAuth, "device_authentication_bytes", e.to_string()));
                return;
            }
        };

        match &device_signed.device_auth {
            DeviceAuth::DeviceSignature(sign1) => {
                let detached = sign1.clone_with_payload(tbs);
                match detached.verify(&device_key) {
                    Ok(()) => report.assessments.push(Assessment::passed(Category::DeviceAuth, "device_signature")),
                    Err(e) => report
                        .assessments
                        .push(Assessment::failed(Category::DeviceAuth, "device_signature", e.to_string())),
                }
            }
            DeviceAuth::DeviceMac(mac0) => {
                let alg = algorithm_of(&mac0.0.protected.header);
                if alg != Some(iana::Algorithm::HMAC_256_256) {
                    report.assessments.push(Assessment::failed(
                        Category::DeviceAuth,
                        "device_mac_algorithm_supported",
                        "deviceMac alg must be 5 (HMAC-256/256)",
                    ));
                    return;
                }
                let Some(reader_key) = options.ephemeral_reader_key else {
                    report.assessments.push(Assessment::failed(
                        Category::DeviceAuth,
                        "ephemeral_reader_key_present",
                        "Ephemeral private key must be present",
                    ));
                    return;
                };
                let device_verifying_key = match crate::cose::VerifyingKey::try_from(&device_key) {
                    Ok(crate::cose::VerifyingKey::P256(k)) => k,
                    _ => {
                        report.assessments.push(Assessment::failed(
                            Category::DeviceAuth,
                            "device_key_supports_mac",
                            "DeviceMac requires a P-256 device key for ECDH",
                        ));
                        return;
                    }
                };
                let emac_key = match derive_emac_key(reader_key, &device_verifying_key, session_transcript_bytes) {
                    Ok(key) => key,
                    Err(e) => {
                        report.assessments.push(Assessment::failed(Category::DeviceAuth, "emac_key_derivation", e.to_string()));
                        return;
                    }
                };
                let detached = mac0.clone_with_payload(tbs);
                match detached.verify(&emac_key) {
                    Ok(()) => report.assessments.push(Assessment::passed(Category::DeviceAuth, "device_mac")),
                    Err(e) => {
                        report.assessments.push(Assessment::failed(Category::DeviceAuth, "device_mac", e.to_string()))
                    }
                }
            }
        }
    }
}

pub(crate) fn digest_matches(item: &IssuerSignedItemBytes, mso: &MobileSecurityObject, namespace: &str) -> bool {
    let expected = mso.digest_for(namespace, item.value().digest_id);
    let actual = digest(mso.digest_algorithm, item.original_bytes());
    expected.map(|e| e == actual.as_slice()).unwrap_or(false)
}

pub(crate) fn algorithm_of(header: &coset::Header) -> Option<iana::Algorithm> {
    match header.alg {
        Some(coset::Algorithm::Assigned(alg)) => Some(alg),
        _ => None,
    }
}

/// `x5chain` (COSE header label 33) is carried in the *unprotected* header per ISO/IEC 18013-5 —
/// it is not itself covered by the signature, the signature instead covers the certificate it
/// names. Unprotected is searched first, as the teacher's `signing_cert()` does; the protected
/// header is checked too, since nothing in COSE forbids a signer from protecting it as well.
fn x5chain_certificates(
    unprotected_rest: &[(coset::Label, ciborium::value::Value)],
    protected_rest: &[(coset::Label, ciborium::value::Value)],
) -> Vec<Vec<u8>> {
    find_x5chain(unprotected_rest).or_else(|| find_x5chain(protected_rest)).unwrap_or_default()
}

fn find_x5chain(rest: &[(coset::Label, ciborium::value::Value)]) -> Option<Vec<Vec<u8>>> {
    rest.iter().find(|(label, _)| *label == coset::Label::Int(33)).map(|(_, value)| match value {
        ciborium::value::Value::Bytes(b) => vec![b.clone()],
        ciborium::value::Value::Array(items) => items
            .iter()
            .filter_map(|v| if let ciborium::value::Value::Bytes(b) = v { Some(b.clone()) } else { None })
            .collect(),
        _ => Vec::new(),
    })
}
