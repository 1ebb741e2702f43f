use std::{convert::TryFrom, fmt};

use crate::error::InvalidChangeHashSlice;

/// The SHA-256 digest of a change's canonical encoding. Rendered as 64 lowercase hex digits.
#[derive(Eq, PartialEq, Debug, Hash, Clone, PartialOrd, Ord, Copy, serde::Serialize, serde::Deserialize)]
pub struct ChangeHash(pub [u8; 32]);

impl ChangeHash {
    pub fn zero() -> Self {
        ChangeHash([0; 32])
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for ChangeHash {
    type Error = InvalidChangeHashSlice;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 32 {
            return Err(InvalidChangeHashSlice(bytes.to_vec()));
        }
        let mut array = [0; 32];
        array.copy_from_slice(bytes);
        Ok(ChangeHash(array))
    }
}
