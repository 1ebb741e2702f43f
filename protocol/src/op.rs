use serde::{Deserialize, Serialize};

use crate::{key::Key, object_id::ObjId, op_id::OpId, op_type::OpType};

/// A single CRDT operation, as produced by a change recorder and consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub action: OpType,
    pub obj: ObjId,
    pub key: Key,
    /// List insertions only: place a new element after `key` rather than assigning to it.
    pub insert: bool,
    /// The visible OpIds this op overrides at the time it was authored.
    pub pred: Vec<OpId>,
}

impl Op {
    pub fn obj_type(&self) -> Option<crate::op_type::ObjType> {
        self.action.obj_type()
    }

    pub fn child(&self, id: &OpId) -> Option<ObjId> {
        self.action.obj_type().map(|_| ObjId::Id(id.clone()))
    }
}
