use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, str::FromStr};

use crate::error::InvalidActorId;

/// A replica identity, unique per session. Rendered as lowercase hex; ordering between
/// actors is the byte-lexicographic order of the underlying bytes.
#[derive(Deserialize, Serialize, Eq, PartialEq, Hash, Debug, Clone, PartialOrd, Ord)]
#[serde(into = "String", try_from = "String")]
pub struct ActorId(Vec<u8>);

impl ActorId {
    pub fn random() -> Self {
        ActorId(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    /// The sentinel actor used only to render the root object id as `0@0`.
    pub(crate) fn zero() -> Self {
        ActorId(vec![0])
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl From<&[u8]> for ActorId {
    fn from(bytes: &[u8]) -> Self {
        ActorId(bytes.to_vec())
    }
}

impl From<Vec<u8>> for ActorId {
    fn from(bytes: Vec<u8>) -> Self {
        ActorId(bytes)
    }
}

impl From<ActorId> for String {
    fn from(actor: ActorId) -> Self {
        actor.to_hex_string()
    }
}

impl TryFrom<String> for ActorId {
    type Error = InvalidActorId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for ActorId {
    type Err = InvalidActorId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s)
            .map(ActorId)
            .map_err(|_| InvalidActorId(s.to_string()))
    }
}
