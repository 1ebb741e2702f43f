use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{actor_id::ActorId, error::InvalidOpId};

/// Lamport identifier of a single operation: `(counter, actor)`. Rendered `"<counter>@<actor>"`.
/// Ordered by counter ascending, ties broken by actor ascending.
#[derive(Eq, PartialEq, Debug, Hash, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct OpId {
    pub counter: u64,
    pub actor: ActorId,
}

impl OpId {
    pub fn new(counter: u64, actor: &ActorId) -> Self {
        OpId {
            counter,
            actor: actor.clone(),
        }
    }

    /// The fixed sentinel used to render the root object as `0@0`.
    pub(crate) fn root_sentinel() -> Self {
        OpId {
            counter: 0,
            actor: ActorId::zero(),
        }
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.actor.cmp(&other.actor))
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.actor)
    }
}

impl From<OpId> for String {
    fn from(id: OpId) -> Self {
        id.to_string()
    }
}

impl std::convert::TryFrom<String> for OpId {
    type Error = InvalidOpId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for OpId {
    type Err = InvalidOpId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '@');
        let counter = parts
            .next()
            .and_then(|c| c.parse::<u64>().ok())
            .ok_or_else(|| InvalidOpId(s.to_string()))?;
        let actor = parts
            .next()
            .ok_or_else(|| InvalidOpId(s.to_string()))?
            .parse::<ActorId>()
            .map_err(|_| InvalidOpId(s.to_string()))?;
        Ok(OpId { counter, actor })
    }
}
