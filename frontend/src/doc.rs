//! The immutable document snapshot (§4.5, §9 "recursively immutable documents"). Grounded in
//! `automerge-frontend/src/state_tree/mod.rs`'s diff-application walk, simplified to the four
//! object kinds and to a plain owned tree rather than that module's persistent/diffable
//! structures: this reference implementation rebuilds the touched subtree on every patch rather
//! than sharing structure, which is the right trade for a reference the tests drive directly
//! rather than for a UI hot path.

use std::collections::HashMap;

use serde::Serialize;
use smol_str::SmolStr;
use weft_protocol::{Diff, DiffEdit, ListDiff, MapDiff, ObjId, ObjType, OpId, Patch, ScalarValue};

use crate::error::FrontendError;

#[derive(Debug, Clone, PartialEq)]
enum NodeValue {
    Scalar(ScalarValue),
    Object(ObjId),
}

#[derive(Debug)]
enum ObjectNode {
    Map {
        obj_type: ObjType,
        props: HashMap<SmolStr, HashMap<OpId, NodeValue>>,
    },
    List {
        obj_type: ObjType,
        elements: Vec<(OpId, NodeValue)>,
    },
}

/// A materialized value, handed out by [`Doc::value_at`] and friends. Mirrors
/// `automerge-frontend`'s `Value`, minus `Cursor` (no text-editing-position concept here).
/// `Serialize`-only (not `Deserialize`): a host renders a snapshot out to JSON/etc, it never
/// reads one back in -- a `Doc` is only ever built from `Patch`es.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Map(HashMap<SmolStr, Value>),
    Table(HashMap<SmolStr, Value>),
    List(Vec<Value>),
    Text(String),
    Primitive(ScalarValue),
}

/// The current state of one replica's document, as last merged from the engine's patches. Reads
/// go through `get_field`/`get_index`/`len`, per design note §9: there is no interior mutability
/// to observe, only the ability to ask for a fresher `Doc` after the next patch.
#[derive(Debug)]
pub struct Doc {
    objects: HashMap<ObjId, ObjectNode>,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            ObjId::Root,
            ObjectNode::Map {
                obj_type: ObjType::Map,
                props: HashMap::new(),
            },
        );
        Doc { objects }
    }

    pub fn root() -> ObjId {
        ObjId::Root
    }

    pub fn object_exists(&self, obj: &ObjId) -> bool {
        self.objects.contains_key(obj)
    }

    /// The value currently assigned to `key` in the map/table `obj`, resolving a conflict set by
    /// the rule from concrete scenario 2: the assignment with the greatest `OpId`.
    pub fn get_field(&self, obj: &ObjId, key: &str) -> Result<Option<Value>, FrontendError> {
        let props = self.map_props(obj)?;
        Ok(props.get(key).and_then(|versions| self.winner(versions)))
    }

    /// Every concurrently-assigned value at `key`, keyed by the `OpId` that authored it.
    pub fn get_conflicts(&self, obj: &ObjId, key: &str) -> Result<Option<HashMap<OpId, Value>>, FrontendError> {
        let props = self.map_props(obj)?;
        Ok(props.get(key).map(|versions| {
            versions
                .iter()
                .map(|(id, nv)| (id.clone(), self.value_of(nv)))
                .collect()
        }))
    }

    pub fn get_index(&self, obj: &ObjId, index: usize) -> Result<Option<Value>, FrontendError> {
        let elements = self.list_elements(obj)?;
        Ok(elements.get(index).map(|(_, nv)| self.value_of(nv)))
    }

    pub fn len(&self, obj: &ObjId) -> Result<usize, FrontendError> {
        match self.objects.get(obj).ok_or_else(|| FrontendError::UnknownObject(obj.clone()))? {
            ObjectNode::Map { props, .. } => Ok(props.len()),
            ObjectNode::List { elements, .. } => Ok(elements.len()),
        }
    }

    pub fn is_empty(&self, obj: &ObjId) -> Result<bool, FrontendError> {
        Ok(self.len(obj)? == 0)
    }

    /// The fully materialized value rooted at `obj`.
    pub fn value_at(&self, obj: &ObjId) -> Result<Value, FrontendError> {
        if !self.objects.contains_key(obj) {
            return Err(FrontendError::UnknownObject(obj.clone()));
        }
        Ok(self.materialize(obj))
    }

    pub(crate) fn visible_ids(&self, obj: &ObjId) -> Vec<OpId> {
        match self.objects.get(obj) {
            Some(ObjectNode::List { elements, .. }) => elements.iter().map(|(id, _)| id.clone()).collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn map_key_ids(&self, obj: &ObjId, key: &str) -> Vec<OpId> {
        match self.objects.get(obj) {
            Some(ObjectNode::Map { props, .. }) => props.get(key).map(|m| m.keys().cloned().collect()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn map_props(&self, obj: &ObjId) -> Result<&HashMap<SmolStr, HashMap<OpId, NodeValue>>, FrontendError> {
        match self.objects.get(obj) {
            Some(ObjectNode::Map { props, .. }) => Ok(props),
            Some(ObjectNode::List { .. }) => Err(FrontendError::NotAMap(obj.clone())),
            None => Err(FrontendError::UnknownObject(obj.clone())),
        }
    }

    fn list_elements(&self, obj: &ObjId) -> Result<&Vec<(OpId, NodeValue)>, FrontendError> {
        match self.objects.get(obj) {
            Some(ObjectNode::List { elements, .. }) => Ok(elements),
            Some(ObjectNode::Map { .. }) => Err(FrontendError::NotAList(obj.clone())),
            None => Err(FrontendError::UnknownObject(obj.clone())),
        }
    }

    fn winner(&self, versions: &HashMap<OpId, NodeValue>) -> Option<Value> {
        versions.iter().max_by(|a, b| a.0.cmp(b.0)).map(|(_, nv)| self.value_of(nv))
    }

    fn value_of(&self, nv: &NodeValue) -> Value {
        match nv {
            NodeValue::Scalar(s) => Value::Primitive(s.clone()),
            NodeValue::Object(id) => self.materialize(id),
        }
    }

    fn materialize(&self, obj: &ObjId) -> Value {
        match self.objects.get(obj) {
            Some(ObjectNode::Map { obj_type, props }) => {
                let mut out = HashMap::new();
                for (key, versions) in props {
                    if let Some(value) = self.winner(versions) {
                        out.insert(key.clone(), value);
                    }
                }
                match obj_type {
                    ObjType::Table => Value::Table(out),
                    _ => Value::Map(out),
                }
            }
            Some(ObjectNode::List { obj_type, elements }) if *obj_type == ObjType::Text => {
                let text = elements
                    .iter()
                    .map(|(_, nv)| match nv {
                        NodeValue::Scalar(ScalarValue::Str(s)) => s.as_str().to_string(),
                        _ => String::new(),
                    })
                    .collect();
                Value::Text(text)
            }
            Some(ObjectNode::List { elements, .. }) => {
                Value::List(elements.iter().map(|(_, nv)| self.value_of(nv)).collect())
            }
            None => Value::Primitive(ScalarValue::Null),
        }
    }

    /// Merges one engine [`Patch`] into the snapshot: every entry in `props`/`edits` replaces
    /// (not appends to) that key's/slot's prior state, since a `Patch` already describes the
    /// post-change conflict set or edit list in full for everything it touches.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<(), FrontendError> {
        if let Some(diff) = &patch.diffs {
            match diff {
                Diff::Map(m) if m.object_id == ObjId::Root => self.apply_map_diff(m)?,
                _ => return Err(FrontendError::InvalidPatch),
            }
        }
        Ok(())
    }

    fn apply_diff(&mut self, diff: &Diff) -> Result<NodeValue, FrontendError> {
        match diff {
            Diff::Value(v) => Ok(NodeValue::Scalar(v.clone())),
            Diff::Map(m) => {
                self.apply_map_diff(m)?;
                Ok(NodeValue::Object(m.object_id.clone()))
            }
            Diff::List(l) => {
                self.apply_list_diff(l)?;
                Ok(NodeValue::Object(l.object_id.clone()))
            }
        }
    }

    fn apply_map_diff(&mut self, m: &MapDiff) -> Result<(), FrontendError> {
        let mut resolved: HashMap<SmolStr, HashMap<OpId, NodeValue>> = HashMap::new();
        for (key, versions) in &m.props {
            let mut inner = HashMap::new();
            for (id, diff) in versions {
                inner.insert(id.clone(), self.apply_diff(diff)?);
            }
            resolved.insert(key.clone(), inner);
        }
        let node = self.objects.entry(m.object_id.clone()).or_insert_with(|| ObjectNode::Map {
            obj_type: ObjType::Map,
            props: HashMap::new(),
        });
        let ObjectNode::Map { props, .. } = node else {
            return Err(FrontendError::NotAMap(m.object_id.clone()));
        };
        for (key, versions) in &m.props {
            if versions.is_empty() {
                props.remove(key);
            } else {
                props.insert(key.clone(), resolved.remove(key).unwrap_or_default());
            }
        }
        Ok(())
    }

    fn apply_list_diff(&mut self, l: &ListDiff) -> Result<(), FrontendError> {
        self.objects.entry(l.object_id.clone()).or_insert_with(|| ObjectNode::List {
            obj_type: ObjType::List,
            elements: Vec::new(),
        });
        for edit in &l.edits {
            match edit {
                DiffEdit::Insert { index, elem_id, value } => {
                    let nv = self.apply_diff(value)?;
                    self.splice_list(&l.object_id, *index, 0, vec![(elem_id.clone(), nv)])?;
                }
                DiffEdit::MultiInsert { index, elem_id, values } => {
                    let items = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            let id = weft_protocol::OpId::new(elem_id.counter + i as u64, &elem_id.actor);
                            (id, NodeValue::Scalar(v.clone()))
                        })
                        .collect();
                    self.splice_list(&l.object_id, *index, 0, items)?;
                }
                DiffEdit::Update { index, op_id, value } => {
                    let nv = self.apply_diff(value)?;
                    if let Some(ObjectNode::List { elements, .. }) = self.objects.get_mut(&l.object_id) {
                        if let Some(slot) = elements.get_mut(*index) {
                            *slot = (op_id.clone(), nv);
                        }
                    }
                }
                DiffEdit::Remove { index, count } => {
                    if let Some(ObjectNode::List { elements, .. }) = self.objects.get_mut(&l.object_id) {
                        let end = (*index + *count).min(elements.len());
                        if *index < end {
                            elements.drain(*index..end);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn splice_list(
        &mut self,
        obj: &ObjId,
        index: usize,
        remove: usize,
        insert: Vec<(OpId, NodeValue)>,
    ) -> Result<(), FrontendError> {
        match self.objects.get_mut(obj) {
            Some(ObjectNode::List { elements, .. }) => {
                let end = (index + remove).min(elements.len());
                elements.splice(index.min(elements.len())..end, insert);
                Ok(())
            }
            Some(ObjectNode::Map { .. }) => Err(FrontendError::NotAList(obj.clone())),
            None => Err(FrontendError::UnknownObject(obj.clone())),
        }
    }
}
