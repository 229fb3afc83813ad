//! Primitive aliases shared across the data model (§3).

use crate::cbor::CborValue;

pub type DocType = String;
pub type NameSpace = String;
pub type DataElementIdentifier = String;
pub type DigestID = u64;

/// A disclosed attribute's value. Shape is only known at decode time, so this is the dynamic
/// [`CborValue`] rather than a fixed struct.
pub type DataElementValue = CborValue;
