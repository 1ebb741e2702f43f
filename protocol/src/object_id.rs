use std::fmt;

use serde::{Deserialize, Serialize};

use crate::op_id::OpId;

/// The id of a composite object (map/list/table/text). The root object has the fixed id
/// `0@0`; every other object is identified by the `OpId` of the op that created it.
#[derive(Eq, PartialEq, Debug, Hash, Clone, Serialize, Deserialize)]
pub enum ObjId {
    Root,
    Id(OpId),
}

impl ObjId {
    pub fn is_root(&self) -> bool {
        matches!(self, ObjId::Root)
    }

    pub fn as_op_id(&self) -> Option<&OpId> {
        match self {
            ObjId::Root => None,
            ObjId::Id(id) => Some(id),
        }
    }
}

impl From<OpId> for ObjId {
    fn from(id: OpId) -> Self {
        ObjId::Id(id)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjId::Root => write!(f, "{}", OpId::root_sentinel()),
            ObjId::Id(id) => write!(f, "{}", id),
        }
    }
}
