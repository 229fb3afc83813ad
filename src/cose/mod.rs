//! COSE structures (RFC 8152), grounded on the teacher's `utils::cose`/`utils::crypto` modules:
//! key conversion (§4.B) and `COSE_Sign1`/`COSE_Mac0` verification (§4.B, §4.E).

pub mod key;
pub mod sign;

pub use key::{KeyError, VerifyingKey};
pub use sign::{CoseError, MdocCoseMac0, MdocCoseSign1};
