//! `DeviceResponse` and everything nested inside it (§3), grounded on the teacher's
//! `iso::disclosure` module.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::cose::{MdocCoseMac0, MdocCoseSign1};
use crate::mso::MobileSecurityObject;
use crate::serialization::TaggedBytes;

use super::{DataElementIdentifier, DataElementValue, DigestID, DocType, NameSpace};

pub type ErrorCode = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: DigestID,
    pub random: ByteBuf,
    #[serde(rename = "elementIdentifier")]
    pub element_identifier: DataElementIdentifier,
    #[serde(rename = "elementValue")]
    pub element_value: DataElementValue,
}

pub type IssuerSignedItemBytes = TaggedBytes<IssuerSignedItem>;
pub type IssuerNameSpaces = IndexMap<NameSpace, Vec<IssuerSignedItemBytes>>;
pub type MobileSecurityObjectBytes = TaggedBytes<MobileSecurityObject>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerSigned {
    #[serde(rename = "nameSpaces", default, skip_serializing_if = "Option::is_none")]
    pub name_spaces: Option<IssuerNameSpaces>,
    #[serde(rename = "issuerAuth")]
    pub issuer_auth: MdocCoseSign1,
}

pub type DeviceNameSpaces = IndexMap<NameSpace, IndexMap<DataElementIdentifier, DataElementValue>>;
pub type DeviceNameSpacesBytes = TaggedBytes<DeviceNameSpaces>;

/// `DeviceAuth`: exactly one of a device signature or a device MAC, per §3/§4.E.
#[derive(Debug, Clone)]
pub enum DeviceAuth {
    DeviceSignature(MdocCoseSign1),
    DeviceMac(MdocCoseMac0),
}

impl Serialize for DeviceAuth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            DeviceAuth::DeviceSignature(sign1) => map.serialize_entry("deviceSignature", sign1)?,
            DeviceAuth::DeviceMac(mac0) => map.serialize_entry("deviceMac", mac0)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeviceAuth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "deviceSignature", default)]
            device_signature: Option<MdocCoseSign1>,
            #[serde(rename = "deviceMac", default)]
            device_mac: Option<MdocCoseMac0>,
        }
        let raw = Raw::deserialize(deserializer)?;
        match (raw.device_signature, raw.device_mac) {
            (Some(sign1), None) => Ok(DeviceAuth::DeviceSignature(sign1)),
            (None, Some(mac0)) => Ok(DeviceAuth::DeviceMac(mac0)),
            _ => Err(serde::de::Error::custom(
                "deviceAuth must contain exactly one of deviceSignature or deviceMac",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSigned {
    #[serde(rename = "nameSpaces")]
    pub name_spaces: DeviceNameSpacesBytes,
    #[serde(rename = "deviceAuth")]
    pub device_auth: DeviceAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "docType")]
    pub doc_type: DocType,
    #[serde(rename = "issuerSigned")]
    pub issuer_signed: IssuerSigned,
    /// Absent for an issuer-only document, one never bound to a device key (§3, §4.G DEVICE_AUTH
    /// precondition "the document carries no `DeviceSigned` block").
    #[serde(rename = "deviceSigned", default, skip_serializing_if = "Option::is_none")]
    pub device_signed: Option<DeviceSigned>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<IndexMap<NameSpace, IndexMap<DataElementIdentifier, ErrorCode>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,
    #[serde(rename = "documentErrors", default, skip_serializing_if = "Option::is_none")]
    pub document_errors: Option<Vec<IndexMap<DocType, ErrorCode>>>,
    pub status: u64,
}
