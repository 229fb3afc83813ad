//! Reconstructs the bytes device authentication is computed over (§4.E), grounded on the
//! teacher's `DeviceAuthenticationBytes`/`DeviceAuthenticationKeyed` in `iso::engagement`.
//!
//! `SessionTranscript` itself is never parsed: §1 scopes transport/engagement out, so the caller
//! supplies its already-CBOR-encoded bytes (`encodedSessionTranscript`, §6) and this module embeds
//! them verbatim as one element of the `DeviceAuthentication` array, rather than decoding and
//! re-encoding a structure this crate has no model for.

use crate::cbor::{encode, encode_array_of_raw_items, CborValue};
use crate::iso::DeviceNameSpacesBytes;
use crate::serialization::{cbor_serialize, CborError};

/// `DeviceAuthentication = ["DeviceAuthentication", SessionTranscript, docType, DeviceNameSpacesBytes]`,
/// tag-24 wrapped as `DeviceAuthenticationBytes` before signing/MACing.
pub fn device_authentication_bytes(
    session_transcript_bytes: &[u8],
    doc_type: &str,
    device_name_spaces_bytes: &DeviceNameSpacesBytes,
) -> Result<Vec<u8>, CborError> {
    let context = encode(&CborValue::Text("DeviceAuthentication".to_owned()));
    let doc_type_bytes = encode(&CborValue::Text(doc_type.to_owned()));
    let name_spaces_bytes = cbor_serialize(device_name_spaces_bytes)?;

    let array = encode_array_of_raw_items(&[
        &context,
        session_transcript_bytes,
        &doc_type_bytes,
        &name_spaces_bytes,
    ]);

    // Wrap as tag 24: a bstr containing the array above.
    let mut tag24_header = Vec::new();
    tag24_header.push(0xd8); // major type 6 (tag), 1-byte argument follows
    tag24_header.push(24);
    let mut bstr_header = Vec::new();
    encode_bstr_header(&mut bstr_header, array.len());

    let mut out = tag24_header;
    out.extend_from_slice(&bstr_header);
    out.extend_from_slice(&array);
    Ok(out)
}

fn encode_bstr_header(out: &mut Vec<u8>, len: usize) {
    let len = len as u64;
    match len {
        0..=23 => out.push(0x40 | len as u8),
        24..=0xff => {
            out.push(0x40 | 24);
            out.push(len as u8);
        }
        0x100..=0xffff => {
            out.push(0x40 | 25);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(0x40 | 26);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

/// The salt for `EMacKey` derivation is `SHA-256(SessionTranscriptBytes)` over these same
/// caller-supplied bytes (§4.E); exposed so callers/tests don't need to duplicate the hashing.
pub fn session_transcript_bytes_for_salt(session_transcript_bytes: &[u8]) -> &[u8] {
    session_transcript_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::TaggedBytes;
    use indexmap::IndexMap;

    #[test]
    fn device_authentication_bytes_embeds_session_transcript_verbatim() {
        let session_transcript_bytes = encode(&CborValue::Array(vec![CborValue::Null; 3]));
        let name_spaces: crate::iso::DeviceNameSpaces = IndexMap::new();
        let wrapped = TaggedBytes::new(name_spaces).unwrap();

        let bytes =
            device_authentication_bytes(&session_transcript_bytes, "org.iso.18013.5.1.mDL", &wrapped)
                .unwrap();

        // The session transcript bytes must appear somewhere inside the assembled structure,
        // spliced in rather than re-encoded.
        assert!(bytes.windows(session_transcript_bytes.len()).any(|w| w == session_transcript_bytes));
    }
}
