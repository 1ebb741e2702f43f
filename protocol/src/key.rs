use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::element_id::ElemId;

/// The slot an op targets within its object: a string key for maps/tables, or an element
/// id for lists/text.
#[derive(Eq, PartialEq, Debug, Hash, Clone, Serialize, Deserialize)]
pub enum Key {
    Map(SmolStr),
    Seq(ElemId),
}

impl Key {
    pub fn as_elem_id(&self) -> Option<&ElemId> {
        match self {
            Key::Map(_) => None,
            Key::Seq(eid) => Some(eid),
        }
    }

    pub fn head() -> Self {
        Key::Seq(ElemId::Head)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Map(s.into())
    }
}

impl From<ElemId> for Key {
    fn from(eid: ElemId) -> Self {
        Key::Seq(eid)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Map(s) => write!(f, "{}", s),
            Key::Seq(eid) => write!(f, "{}", eid),
        }
    }
}
