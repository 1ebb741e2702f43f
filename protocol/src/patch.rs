use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{actor_id::ActorId, change_hash::ChangeHash, object_id::ObjId, op_id::OpId, value::ScalarValue};

impl Patch {
    /// An empty patch: nothing changed. The identity element for merging successive patches.
    pub fn empty() -> Self {
        Patch {
            diffs: None,
            deps: Vec::new(),
            max_op: 0,
            clock: HashMap::new(),
            actor: None,
            seq: None,
            pending_changes: 0,
        }
    }
}

/// The delta from the document state before a batch of changes to after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub diffs: Option<Diff>,
    pub deps: Vec<ChangeHash>,
    pub max_op: u64,
    pub clock: HashMap<ActorId, u64>,
    pub actor: Option<ActorId>,
    pub seq: Option<u64>,
    pub pending_changes: usize,
}

/// A diff at a single position in the object tree. `Value` diffs terminate a walk at a leaf
/// (including when the leaf value is itself a reference to an already-known object, in which
/// case `object_id` distinguishes a fresh object from an update to an existing one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diff {
    Map(MapDiff),
    List(ListDiff),
    Value(ScalarValue),
}

/// Per-key `{opId -> nested diff}` entries for every key whose active assignment set changed.
/// A key with an empty inner map means every assignment was deleted (the key disappears from
/// the projection, but the empty entry is still emitted per §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDiff {
    pub object_id: ObjId,
    pub props: HashMap<SmolStr, HashMap<OpId, Diff>>,
}

/// Edits, in the order they must be applied against the post-edit list, referring to
/// positions in that post-edit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDiff {
    pub object_id: ObjId,
    pub edits: Vec<DiffEdit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiffEdit {
    Insert {
        index: usize,
        elem_id: OpId,
        value: Diff,
    },
    /// A run of consecutive primitive inserts by the same actor at adjacent positions.
    /// Semantically equivalent to the expanded sequence of `Insert`s starting at `elem_id`.
    MultiInsert {
        index: usize,
        elem_id: OpId,
        values: Vec<ScalarValue>,
    },
    Update {
        index: usize,
        op_id: OpId,
        value: Diff,
    },
    Remove {
        index: usize,
        count: usize,
    },
}
