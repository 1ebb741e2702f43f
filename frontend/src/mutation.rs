//! The recorder a `Frontend::change` closure writes through (§9 "mutable proxy → op stream"),
//! grounded in `automerge-frontend/src/mutation.rs`'s `MutableDocument`/`MutationTracker` split
//! but flattened: callers address objects and list positions directly instead of through a
//! recursive `Path`, since the recursive-proxy half of that split is explicitly out of scope
//! here (§4.5 expansion).

use std::collections::HashMap;

use smol_str::SmolStr;
use weft_protocol::{ActorId, ElemId, Key, ObjId, ObjType, Op, OpId, OpType, ScalarValue};

use crate::{doc::Doc, error::FrontendError};

/// Builds one change's op list against a read-only base [`Doc`], tracking the local effect of
/// each op (new preds, new list positions) only for the duration of the closure -- equivalent to
/// `MutationTracker::max_op` bookkeeping in `automerge-frontend/src/mutation.rs`, minus the
/// eagerly-applied `StateTree` mutation it also performs (the base `Doc` is only updated once the engine returns a real
/// `Patch`, per §5's synchronous single-threaded model: there is no separate backend thread to
/// get ahead of, so there is nothing to keep optimistically in sync).
pub struct LocalChange<'a> {
    actor: &'a ActorId,
    doc: &'a Doc,
    next_counter: u64,
    ops: Vec<Op>,
    list_ids: HashMap<ObjId, Vec<OpId>>,
    map_ids: HashMap<(ObjId, SmolStr), Vec<OpId>>,
}

impl<'a> LocalChange<'a> {
    pub(crate) fn new(doc: &'a Doc, actor: &'a ActorId, start_op: u64) -> Self {
        LocalChange {
            actor,
            doc,
            next_counter: start_op,
            ops: Vec::new(),
            list_ids: HashMap::new(),
            map_ids: HashMap::new(),
        }
    }

    pub(crate) fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    fn next_id(&mut self) -> OpId {
        let id = OpId::new(self.next_counter, self.actor);
        self.next_counter += 1;
        id
    }

    fn map_pred(&mut self, obj: &ObjId, key: &str) -> Vec<OpId> {
        let entry_key = (obj.clone(), SmolStr::from(key));
        if let Some(ids) = self.map_ids.get(&entry_key) {
            return ids.clone();
        }
        self.doc.map_key_ids(obj, key)
    }

    fn set_map_pred(&mut self, obj: &ObjId, key: &str, ids: Vec<OpId>) {
        self.map_ids.insert((obj.clone(), SmolStr::from(key)), ids);
    }

    fn list_ids(&mut self, obj: &ObjId) -> Vec<OpId> {
        self.list_ids.entry(obj.clone()).or_insert_with(|| self.doc.visible_ids(obj)).clone()
    }

    /// Sets `key` in map/table `obj` to `value`, overriding any concurrent assignment seen so
    /// far (local or from the base snapshot).
    pub fn set(&mut self, obj: &ObjId, key: &str, value: impl Into<ScalarValue>) -> Op {
        let pred = self.map_pred(obj, key);
        let id = self.next_id();
        let value = value.into();
        let op = Op {
            action: OpType::Set(value),
            obj: obj.clone(),
            key: Key::from(key),
            insert: false,
            pred,
        };
        self.ops.push(op.clone());
        self.set_map_pred(obj, key, vec![id]);
        op
    }

    /// Deletes `key` from map/table `obj`. A no-op (returns `None`) if the key is already gone.
    pub fn delete(&mut self, obj: &ObjId, key: &str) -> Option<Op> {
        let pred = self.map_pred(obj, key);
        if pred.is_empty() {
            return None;
        }
        let op = Op {
            action: OpType::Del,
            obj: obj.clone(),
            key: Key::from(key),
            insert: false,
            pred,
        };
        self.ops.push(op.clone());
        self.set_map_pred(obj, key, Vec::new());
        Some(op)
    }

    /// Adds `delta` to the counter at `key`. Leaves `pred` bookkeeping untouched: an increment
    /// does not replace the assignment it targets, per the engine's `apply_map_op`.
    pub fn increment(&mut self, obj: &ObjId, key: &str, delta: i64) -> Option<Op> {
        let pred = self.map_pred(obj, key);
        if pred.is_empty() {
            return None;
        }
        let op = Op {
            action: OpType::Inc(delta),
            obj: obj.clone(),
            key: Key::from(key),
            insert: false,
            pred,
        };
        self.ops.push(op.clone());
        Some(op)
    }

    fn create_in_map(&mut self, obj: &ObjId, key: &str, obj_type: ObjType) -> ObjId {
        let pred = self.map_pred(obj, key);
        let id = self.next_id();
        let op = Op {
            action: OpType::Make(obj_type),
            obj: obj.clone(),
            key: Key::from(key),
            insert: false,
            pred,
        };
        self.ops.push(op);
        self.set_map_pred(obj, key, vec![id.clone()]);
        ObjId::Id(id)
    }

    pub fn create_map(&mut self, obj: &ObjId, key: &str) -> ObjId {
        self.create_in_map(obj, key, ObjType::Map)
    }

    pub fn create_table(&mut self, obj: &ObjId, key: &str) -> ObjId {
        self.create_in_map(obj, key, ObjType::Table)
    }

    pub fn create_list(&mut self, obj: &ObjId, key: &str) -> ObjId {
        self.create_in_map(obj, key, ObjType::List)
    }

    pub fn create_text(&mut self, obj: &ObjId, key: &str) -> ObjId {
        self.create_in_map(obj, key, ObjType::Text)
    }

    /// Inserts `value` at `index` in list/text `obj`, shifting later elements right.
    pub fn insert(&mut self, obj: &ObjId, index: usize, value: impl Into<ScalarValue>) -> Result<Op, FrontendError> {
        let ids = self.list_ids(obj);
        if index > ids.len() {
            return Err(FrontendError::IndexOutOfBounds { index, len: ids.len() });
        }
        let key = if index == 0 {
            Key::head()
        } else {
            Key::from(ElemId::Id(ids[index - 1].clone()))
        };
        let id = self.next_id();
        let value = value.into();
        let op = Op {
            action: OpType::Set(value),
            obj: obj.clone(),
            key,
            insert: true,
            pred: Vec::new(),
        };
        self.ops.push(op.clone());
        self.list_ids.get_mut(obj).unwrap().insert(index, id);
        Ok(op)
    }

    /// Overwrites the value at `index`, superseding whatever is currently assigned there.
    pub fn set_index(&mut self, obj: &ObjId, index: usize, value: impl Into<ScalarValue>) -> Result<Op, FrontendError> {
        let ids = self.list_ids(obj);
        let current = ids
            .get(index)
            .cloned()
            .ok_or(FrontendError::IndexOutOfBounds { index, len: ids.len() })?;
        let new_id = self.next_id();
        let value = value.into();
        let op = Op {
            action: OpType::Set(value),
            obj: obj.clone(),
            key: Key::from(ElemId::Id(current.clone())),
            insert: false,
            pred: vec![current],
        };
        self.ops.push(op.clone());
        self.list_ids.get_mut(obj).unwrap()[index] = new_id;
        Ok(op)
    }

    pub fn delete_index(&mut self, obj: &ObjId, index: usize) -> Result<Op, FrontendError> {
        let ids = self.list_ids(obj);
        let current = ids
            .get(index)
            .cloned()
            .ok_or(FrontendError::IndexOutOfBounds { index, len: ids.len() })?;
        let op = Op {
            action: OpType::Del,
            obj: obj.clone(),
            key: Key::from(ElemId::Id(current.clone())),
            insert: false,
            pred: vec![current],
        };
        self.ops.push(op.clone());
        self.list_ids.get_mut(obj).unwrap().remove(index);
        Ok(op)
    }

    pub fn increment_index(&mut self, obj: &ObjId, index: usize, delta: i64) -> Result<Op, FrontendError> {
        let ids = self.list_ids(obj);
        let current = ids
            .get(index)
            .cloned()
            .ok_or(FrontendError::IndexOutOfBounds { index, len: ids.len() })?;
        let op = Op {
            action: OpType::Inc(delta),
            obj: obj.clone(),
            key: Key::from(ElemId::Id(current.clone())),
            insert: false,
            pred: vec![current],
        };
        self.ops.push(op.clone());
        Ok(op)
    }
}
