//! End-to-end scenarios exercising `Verifier::verify` against hand-assembled `DeviceResponse`
//! fixtures, in the spirit of the teacher's `rstest`-based `verifier.rs` test suite but adapted to
//! the Assessment-based reporting API.

use ciborium::value::Value;
use coset::{iana, AsCborValue, CoseKeyBuilder, CoseMac0Builder, CoseSign1Builder, HeaderBuilder};
use indexmap::IndexMap;
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use p256::pkcs8::EncodePrivateKey;
use rand_core::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rstest::rstest;

use mdl_verifier::cbor::CborValue;
use mdl_verifier::crypto::{derive_emac_key, digest};
use mdl_verifier::generator::MockTimeGenerator;
use mdl_verifier::iso::{
    DeviceAuth, DeviceResponse, DeviceSigned, Document, IssuerSigned, IssuerSignedItem,
};
use mdl_verifier::mso::{DigestAlgorithm, MobileSecurityObject, ValidityInfo};
use mdl_verifier::serialization::{cbor_serialize, TaggedBytes};
use mdl_verifier::transcript::device_authentication_bytes;
use mdl_verifier::verifier::{Category, Status, VerifyOptions, Verifier};

const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
const NAMESPACE: &str = "org.iso.18013.5.1";

fn cose_key_for(key: &VerifyingKey) -> Value {
    let point = key.to_encoded_point(false);
    let cose_key = CoseKeyBuilder::new_ec2_pub_key(
        iana::EllipticCurve::P_256,
        point.x().unwrap().to_vec(),
        point.y().unwrap().to_vec(),
    )
    .build();
    cose_key.to_cbor_value().unwrap()
}

/// Builds a minimal self-signed certificate around `key`, bridging the ecdsa key into `rcgen` via
/// a PKCS8 PEM round-trip, so `verify_issuer_auth`'s x5chain/subject checks have something real to
/// parse (§4.C). Chain-to-anchor validation itself stays disabled in these tests; `x509::chain`
/// has its own dedicated coverage for that.
fn self_signed_cert_der(key: &SigningKey, country: &str) -> Vec<u8> {
    let pkcs8 = key.to_pkcs8_der().unwrap();
    let key_pair = KeyPair::from_der(pkcs8.as_bytes()).unwrap();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, "Test Document Signer");
    name.push(DnType::CountryName, country);
    let mut params = CertificateParams::default();
    params.distinguished_name = name;
    let cert = params.self_signed(&key_pair).unwrap();
    cert.der().to_vec()
}

enum DeviceAuthKind {
    Signature,
    Mac { reader_key: SigningKey },
}

struct BuildOptions {
    tamper_value: bool,
    tamper_doctype: bool,
    cert_country: &'static str,
    issuing_country: Option<&'static str>,
    device_auth: DeviceAuthKind,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tamper_value: false,
            tamper_doctype: false,
            cert_country: "NL",
            issuing_country: None,
            device_auth: DeviceAuthKind::Signature,
        }
    }
}

struct Fixture {
    signer_key: SigningKey,
    device_key: SigningKey,
    session_transcript_bytes: Vec<u8>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            signer_key: SigningKey::random(&mut OsRng),
            device_key: SigningKey::random(&mut OsRng),
            session_transcript_bytes: mdl_verifier::cbor::encode(&CborValue::Array(vec![
                CborValue::Null,
                CborValue::Null,
                CborValue::Null,
            ])),
        }
    }

    fn build(&self, now: chrono::DateTime<chrono::Utc>, options: BuildOptions) -> Vec<u8> {
        let given_name = IssuerSignedItem {
            digest_id: 1,
            random: serde_bytes::ByteBuf::from(vec![1, 2, 3, 4]),
            element_identifier: "given_name".to_string(),
            element_value: CborValue::Text("Alice".to_string()),
        };
        let given_name_bytes = TaggedBytes::new(given_name).unwrap();

        let mut ids = IndexMap::new();
        ids.insert(1u64, serde_bytes::ByteBuf::from(digest(DigestAlgorithm::Sha256, given_name_bytes.original_bytes())));

        let mut items = vec![if options.tamper_value {
            let mut tampered = given_name_bytes.value().clone();
            tampered.element_value = CborValue::Text("Mallory".to_string());
            TaggedBytes::new(tampered).unwrap()
        } else {
            given_name_bytes
        }];

        if let Some(issuing_country) = options.issuing_country {
            let item = IssuerSignedItem {
                digest_id: 2,
                random: serde_bytes::ByteBuf::from(vec![5, 6, 7, 8]),
                element_identifier: "issuing_country".to_string(),
                element_value: CborValue::Text(issuing_country.to_string()),
            };
            let item_bytes = TaggedBytes::new(item).unwrap();
            ids.insert(2u64, serde_bytes::ByteBuf::from(digest(DigestAlgorithm::Sha256, item_bytes.original_bytes())));
            items.push(item_bytes);
        }

        let mut value_digests = IndexMap::new();
        value_digests.insert(NAMESPACE.to_string(), ids);

        let device_key_value = cose_key_for(&VerifyingKey::from(&self.device_key));
        let mso = MobileSecurityObject {
            version: "1.0".to_string(),
            digest_algorithm: DigestAlgorithm::Sha256,
            value_digests,
            device_key_info: device_key_info_from_cose_key(device_key_value),
            doc_type: if options.tamper_doctype { "org.iso.18013.5.1.other".to_string() } else { DOC_TYPE.to_string() },
            validity_info: ValidityInfo {
                signed: mdl_verifier::iso::Tdate(now),
                valid_from: mdl_verifier::iso::Tdate(now),
                valid_until: mdl_verifier::iso::Tdate(now + chrono::Duration::days(365)),
                expected_update: None,
            },
        };
        let mso_bytes = cbor_serialize(&mso).unwrap();

        let cert_der = self_signed_cert_der(&self.signer_key, options.cert_country);
        let protected = HeaderBuilder::new().algorithm(iana::Algorithm::ES256).build();
        let unprotected = HeaderBuilder::new().value(33, Value::Bytes(cert_der)).build();
        let sign1 = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected)
            .payload(wrap_tag24(&mso_bytes))
            .create_signature(&[], |data| {
                let sig: Signature = self.signer_key.sign(data);
                sig.to_vec()
            })
            .build();

        let mut name_spaces = IndexMap::new();
        name_spaces.insert(NAMESPACE.to_string(), items);

        let issuer_signed = IssuerSigned {
            name_spaces: Some(name_spaces),
            issuer_auth: mdl_verifier::cose::MdocCoseSign1(sign1),
        };

        let device_name_spaces: mdl_verifier::iso::DeviceNameSpaces = IndexMap::new();
        let device_name_spaces_bytes = TaggedBytes::new(device_name_spaces).unwrap();
        let tbs = device_authentication_bytes(&self.session_transcript_bytes, DOC_TYPE, &device_name_spaces_bytes)
            .unwrap();

        let device_auth = match &options.device_auth {
            DeviceAuthKind::Signature => {
                let device_protected = HeaderBuilder::new().algorithm(iana::Algorithm::ES256).build();
                let device_sign1 = CoseSign1Builder::new()
                    .protected(device_protected)
                    .payload(tbs)
                    .create_signature(&[], |data| {
                        let sig: Signature = self.device_key.sign(data);
                        sig.to_vec()
                    })
                    .build();
                DeviceAuth::DeviceSignature(mdl_verifier::cose::MdocCoseSign1(device_sign1))
            }
            DeviceAuthKind::Mac { reader_key, .. } => {
                let emac_key =
                    derive_emac_key(reader_key, &VerifyingKey::from(&self.device_key), &self.session_transcript_bytes)
                        .unwrap();
                let device_protected = HeaderBuilder::new().algorithm(iana::Algorithm::HMAC_256_256).build();
                let mac0 = CoseMac0Builder::new()
                    .protected(device_protected)
                    .payload(tbs)
                    .create_tag(&[], |data| ring::hmac::sign(&emac_key, data).as_ref().to_vec())
                    .build();
                DeviceAuth::DeviceMac(mdl_verifier::cose::MdocCoseMac0(mac0))
            }
        };

        let device_signed = DeviceSigned { name_spaces: device_name_spaces_bytes, device_auth };

        let document = Document {
            doc_type: DOC_TYPE.to_string(),
            issuer_signed,
            device_signed: Some(device_signed),
            errors: None,
        };

        let response = DeviceResponse { version: "1.0".to_string(), documents: Some(vec![document]), document_errors: None, status: 0 };
        cbor_serialize(&response).unwrap()
    }
}

fn wrap_tag24(inner: &[u8]) -> Vec<u8> {
    mdl_verifier::cbor::encode(&CborValue::Tag(24, Box::new(CborValue::Bytes(inner.to_vec()))))
}

// `DeviceKeyInfo` hides its field behind a constructor-free struct; round-trip through CBOR to
// build one from a raw COSE_Key value in test fixtures.
fn device_key_info_from_cose_key(device_key: Value) -> mdl_verifier::mso::DeviceKeyInfo {
    let map = Value::Map(vec![(Value::Text("deviceKey".to_string()), device_key)]);
    let bytes = {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        out
    };
    ciborium::de::from_reader(bytes.as_slice()).unwrap()
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc)
}

#[test]
fn s1_happy_path_verifies_successfully() {
    let fixture = Fixture::new();
    let bytes = fixture.build(now(), BuildOptions::default());
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut assessments = Vec::new();
    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;
    options.on_check = Some(&mut |a| assessments.push(a));

    let result = verifier.verify(&bytes, options);
    assert!(result.is_ok(), "expected successful verification, got {result:?}");
    assert!(assessments.iter().all(|a| a.status != Status::Failed), "{assessments:?}");
    assert!(assessments.iter().any(|a| a.category == Category::DeviceAuth && a.status == Status::Passed));
}

#[test]
fn tampered_attribute_value_fails_digest_binding() {
    let fixture = Fixture::new();
    let bytes = fixture.build(now(), BuildOptions { tamper_value: true, ..Default::default() });
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut assessments = Vec::new();
    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;
    options.on_check = Some(&mut |a| assessments.push(a));

    let _ = verifier.verify(&bytes, options);
    assert!(assessments
        .iter()
        .any(|a| a.category == Category::DataIntegrity && a.status == Status::Failed));
}

#[test]
fn wrong_doc_type_in_mso_fails_format_check() {
    let fixture = Fixture::new();
    let bytes = fixture.build(now(), BuildOptions { tamper_doctype: true, ..Default::default() });
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut assessments = Vec::new();
    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;
    options.on_check = Some(&mut |a| assessments.push(a));

    let _ = verifier.verify(&bytes, options);
    assert!(assessments
        .iter()
        .any(|a| a.check == "doc_type_matches_mso" && a.status == Status::Failed));
}

#[test]
fn expired_validity_window_fails_fast_without_collector() {
    let fixture = Fixture::new();
    let stale_now = now() - chrono::Duration::days(400);
    let bytes = fixture.build(stale_now, BuildOptions::default());
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;

    let result = verifier.verify(&bytes, options);
    assert!(result.is_err());
}

#[test]
fn device_mac_path_verifies_successfully_given_the_ephemeral_reader_key() {
    let fixture = Fixture::new();
    let reader_key = SigningKey::random(&mut OsRng);
    let bytes = fixture.build(
        now(),
        BuildOptions {
            device_auth: DeviceAuthKind::Mac { reader_key: reader_key.clone() },
            ..Default::default()
        },
    );
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut assessments = Vec::new();
    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;
    options.ephemeral_reader_key = Some(&reader_key);
    options.on_check = Some(&mut |a| assessments.push(a));

    let result = verifier.verify(&bytes, options);
    assert!(result.is_ok(), "expected successful verification, got {result:?}");
    assert!(assessments.iter().any(|a| a.category == Category::DeviceAuth && a.check == "device_mac" && a.status == Status::Passed));
}

#[test]
fn device_mac_path_fails_without_an_ephemeral_reader_key() {
    let fixture = Fixture::new();
    let reader_key = SigningKey::random(&mut OsRng);
    let bytes = fixture.build(
        now(),
        BuildOptions {
            device_auth: DeviceAuthKind::Mac { reader_key },
            ..Default::default()
        },
    );
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut assessments = Vec::new();
    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;
    options.on_check = Some(&mut |a| assessments.push(a));

    let _ = verifier.verify(&bytes, options);
    assert!(assessments.iter().any(|a| {
        a.category == Category::DeviceAuth
            && a.check == "ephemeral_reader_key_present"
            && a.status == Status::Failed
    }));
}

#[rstest]
#[case("US", "NL")]
#[case("NL", "US")]
fn issuing_country_mismatch_against_certificate_fails_data_integrity(#[case] issuing_country: &'static str, #[case] cert_country: &'static str) {
    let fixture = Fixture::new();
    let bytes = fixture.build(
        now(),
        BuildOptions { issuing_country: Some(issuing_country), cert_country, ..Default::default() },
    );
    let verifier = Verifier::with_generator(Vec::new(), MockTimeGenerator(now()));

    let mut assessments = Vec::new();
    let mut options = VerifyOptions::new(&fixture.session_transcript_bytes);
    options.disable_certificate_chain_validation = true;
    options.on_check = Some(&mut |a| assessments.push(a));

    let _ = verifier.verify(&bytes, options);
    assert!(assessments.iter().any(|a| {
        a.category == Category::DataIntegrity && a.check == "issuing_country_matches_certificate" && a.status == Status::Failed
    }));
}
