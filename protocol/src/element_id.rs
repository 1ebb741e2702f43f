use std::fmt;

use serde::{Deserialize, Serialize};

use crate::op_id::OpId;

/// The stable identity of a list/text element: the `OpId` of the op that inserted it, or
/// the sentinel `Head` denoting "before the first element".
#[derive(Eq, PartialEq, Debug, Hash, Clone, Serialize, Deserialize)]
pub enum ElemId {
    Head,
    Id(OpId),
}

impl ElemId {
    pub fn as_op_id(&self) -> Option<&OpId> {
        match self {
            ElemId::Head => None,
            ElemId::Id(id) => Some(id),
        }
    }
}

impl From<OpId> for ElemId {
    fn from(id: OpId) -> Self {
        ElemId::Id(id)
    }
}

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemId::Head => write!(f, "_head"),
            ElemId::Id(id) => write!(f, "{}", id),
        }
    }
}
