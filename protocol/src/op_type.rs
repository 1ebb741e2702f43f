use serde::{Deserialize, Serialize};

use crate::{object_id::ObjId, value::ScalarValue};

/// The four composite object kinds a `make*` op may create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjType {
    Map,
    Table,
    List,
    Text,
}

impl ObjType {
    pub fn is_sequence(&self) -> bool {
        matches!(self, ObjType::List | ObjType::Text)
    }
}

/// `action` from §3, folding `value`/`datatype`/`child` into the variant that carries them,
/// and folding the `values`+`multiOp` run-length fields into a dedicated `MultiSet` variant
/// (grounded on the `expanded_op.rs`/`op_type.rs` split between wire shape and applied shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpType {
    Make(ObjType),
    Del,
    Inc(i64),
    Set(ScalarValue),
    /// References an existing object from a new key/index without creating one.
    Link(ObjId),
    /// A run of `n` consecutive primitive inserts sharing one base elemId; counters increment
    /// by 1 per element. Expanded into individual `Set` ops by the engine before being applied.
    MultiSet(Vec<ScalarValue>),
}

impl OpType {
    pub fn obj_type(&self) -> Option<ObjType> {
        match self {
            OpType::Make(ot) => Some(*ot),
            _ => None,
        }
    }
}
