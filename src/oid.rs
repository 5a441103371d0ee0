use std::fmt;

use crate::error::{CovError, Result};

/// Number of bytes in an object id.
pub const OID_RAW_SIZE: usize = 20;

/// Number of hex characters in the textual form of an object id.
pub const OID_HEX_SIZE: usize = 40;

/// A 160-bit content hash naming an object in the store.
///
/// The all-zero id is a sentinel meaning "none"; no real object hashes to it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Oid([u8; OID_RAW_SIZE]);

impl Oid {
    pub const ZERO: Oid = Oid([0; OID_RAW_SIZE]);

    pub fn from_bytes(bytes: [u8; OID_RAW_SIZE]) -> Oid {
        Oid(bytes)
    }

    /// Parses 40 lowercase (or mixed-case) hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Oid> {
        if hex_str.len() != OID_HEX_SIZE {
            return Err(CovError::NotFound);
        }
        let mut bytes = [0u8; OID_RAW_SIZE];
        hex::decode_to_slice(hex_str, &mut bytes).map_err(|_| CovError::NotFound)?;
        Ok(Oid(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; OID_RAW_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; OID_RAW_SIZE]
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// The loose-object path form: the first two hex characters, a slash, and
    /// the remaining 38.
    pub fn path_name(self) -> String {
        let hex_str = self.to_hex();
        format!("{}/{}", &hex_str[..2], &hex_str[2..])
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}
