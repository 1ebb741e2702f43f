//! The OpSet is where most of the interesting work happens (§4.2): applying an op against the
//! active-assignment-set state and producing the `Patch` fragment it caused. Grounded on
//! automerge-rs's `op_set.rs` role (mapping object ids to concurrent-operation state), adapted to
//! the explicit `pred`-driven conflict model instead of its actor-clock/undo-op one.

use std::collections::HashMap;

use fxhash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use weft_protocol::{
    Diff, DiffEdit, ListDiff, MapDiff, ObjId, ObjType, Op, OpId, OpType, Patch, ScalarValue,
};

use crate::{
    error::EngineError,
    object_state::{add_assignment, remove_preds, AssignedValue, ListState, MapState, ObjectState},
};

enum Touch {
    MapKey(ObjId, SmolStr),
    ListInsert { obj: ObjId, index: usize, elem_id: OpId },
    ListUpdate { obj: ObjId, index: usize, elem_id: OpId },
    ListRemove { obj: ObjId, index: usize },
}

/// The live CRDT state of a single document: every reachable composite object's active
/// assignment sets, keyed by `ObjId` (the root included, under `ObjId::Root`).
pub(crate) struct OpSet {
    objects: FxHashMap<ObjId, ObjectState>,
    parent_of: FxHashMap<ObjId, ObjId>,
}

impl OpSet {
    pub fn new() -> Self {
        let mut objects = FxHashMap::default();
        objects.insert(ObjId::Root, ObjectState::new(ObjType::Map));
        OpSet {
            objects,
            parent_of: FxHashMap::default(),
        }
    }

    fn obj_type_of(&self, obj: &ObjId) -> Result<ObjType, EngineError> {
        if obj.is_root() {
            return Ok(ObjType::Map);
        }
        self.objects
            .get(obj)
            .map(ObjectState::obj_type)
            .ok_or_else(|| EngineError::DanglingReference(obj.clone()))
    }

    fn map_mut(&mut self, obj: &ObjId) -> Result<&mut MapState, EngineError> {
        self.objects
            .get_mut(obj)
            .and_then(ObjectState::as_map_mut)
            .ok_or_else(|| EngineError::DanglingReference(obj.clone()))
    }

    fn list_mut(&mut self, obj: &ObjId) -> Result<&mut ListState, EngineError> {
        self.objects
            .get_mut(obj)
            .and_then(ObjectState::as_list_mut)
            .ok_or_else(|| EngineError::DanglingReference(obj.clone()))
    }

    fn list(&self, obj: &ObjId) -> Result<&ListState, EngineError> {
        match self.objects.get(obj) {
            Some(ObjectState::List(_, l)) => Ok(l),
            _ => Err(EngineError::DanglingReference(obj.clone())),
        }
    }

    /// Applies one op (with its already-assigned `id`) against the current state. Returns the
    /// ids of any objects freshly created by this op, for the caller to track as "created this
    /// change" (which controls whether the eventual patch embeds their full contents or just a
    /// bare reference).
    fn apply_op(&mut self, id: OpId, op: &Op) -> Result<(Vec<Touch>, Vec<ObjId>), EngineError> {
        if let OpType::MultiSet(values) = &op.action {
            return self.apply_multi_set(id, op, values);
        }
        let target_type = self.obj_type_of(&op.obj)?;
        match (op.key.as_elem_id(), target_type.is_sequence()) {
            (None, false) => self.apply_map_op(id, op),
            (Some(_), true) => self.apply_list_op(id, op),
            _ => Err(EngineError::InvalidArgument(format!(
                "key {} incompatible with object {} ({:?})",
                op.key, op.obj, target_type
            ))),
        }
    }

    fn apply_map_op(&mut self, id: OpId, op: &Op) -> Result<(Vec<Touch>, Vec<ObjId>), EngineError> {
        let key = match &op.key {
            weft_protocol::Key::Map(s) => s.clone(),
            _ => unreachable!("apply_map_op only called for map keys"),
        };
        let mut created = Vec::new();
        {
            let map = self.map_mut(&op.obj)?;
            let set = map.props.entry(key.clone()).or_insert_with(Vec::new);
            match &op.action {
                OpType::Inc(delta) => {
                    for a in set.iter_mut() {
                        if op.pred.contains(&a.id) {
                            if let AssignedValue::Value(ScalarValue::Counter(v)) = &mut a.value {
                                *v += delta;
                            }
                        }
                    }
                }
                OpType::Del => remove_preds(set, &op.pred),
                OpType::Set(v) => {
                    remove_preds(set, &op.pred);
                    add_assignment(set, id.clone(), AssignedValue::Value(v.clone()));
                }
                OpType::Make(_) | OpType::Link(_) => {
                    remove_preds(set, &op.pred);
                }
                OpType::MultiSet(_) => unreachable!("expanded before reaching apply_map_op"),
            }
        }
        match &op.action {
            OpType::Make(obj_type) => {
                let child = ObjId::Id(id.clone());
                self.objects.insert(child.clone(), ObjectState::new(*obj_type));
                self.parent_of.insert(child.clone(), op.obj.clone());
                let set = self.map_mut(&op.obj)?.props.entry(key.clone()).or_insert_with(Vec::new);
                add_assignment(set, id.clone(), AssignedValue::Object(child.clone(), *obj_type));
                created.push(child);
            }
            OpType::Link(target) => {
                let target_type = self.obj_type_of(target)?;
                let set = self.map_mut(&op.obj)?.props.entry(key.clone()).or_insert_with(Vec::new);
                add_assignment(set, id.clone(), AssignedValue::Object(target.clone(), target_type));
            }
            _ => {}
        }
        Ok((vec![Touch::MapKey(op.obj.clone(), key)], created))
    }

    fn apply_list_op(&mut self, id: OpId, op: &Op) -> Result<(Vec<Touch>, Vec<ObjId>), EngineError> {
        if op.insert {
            self.apply_list_insert(id, op, None)
        } else {
            self.apply_list_update(id, op)
        }
    }

    fn apply_list_insert(
        &mut self,
        id: OpId,
        op: &Op,
        forced_value: Option<ScalarValue>,
    ) -> Result<(Vec<Touch>, Vec<ObjId>), EngineError> {
        let after = op.key.as_elem_id().and_then(|e| e.as_op_id()).cloned();
        let mut created = Vec::new();
        let assignment = match (&op.action, &forced_value) {
            (_, Some(v)) => AssignedValue::Value(v.clone()),
            (OpType::Set(v), None) => AssignedValue::Value(v.clone()),
            (OpType::Make(obj_type), None) => {
                let child = ObjId::Id(id.clone());
                self.objects.insert(child.clone(), ObjectState::new(*obj_type));
                self.parent_of.insert(child.clone(), op.obj.clone());
                created.push(child.clone());
                AssignedValue::Object(child, *obj_type)
            }
            (OpType::Link(target), None) => {
                let target_type = self.obj_type_of(target)?;
                AssignedValue::Object(target.clone(), target_type)
            }
            _ => {
                return Err(EngineError::InvalidArgument(
                    "list insert requires a value-bearing action".into(),
                ))
            }
        };
        let list = self.list_mut(&op.obj)?;
        let pos = list.insertion_point(after.as_ref(), &id);
        list.elements.insert(
            pos,
            crate::object_state::ListElement {
                id: id.clone(),
                assignments: vec![crate::object_state::Assignment {
                    id: id.clone(),
                    value: assignment,
                }],
            },
        );
        let index = list.visible_count_before(pos);
        Ok((
            vec![Touch::ListInsert {
                obj: op.obj.clone(),
                index,
                elem_id: id,
            }],
            created,
        ))
    }

    fn apply_list_update(&mut self, id: OpId, op: &Op) -> Result<(Vec<Touch>, Vec<ObjId>), EngineError> {
        let elem_id = op
            .key
            .as_elem_id()
            .and_then(|e| e.as_op_id())
            .cloned()
            .ok_or_else(|| EngineError::InvalidArgument("update requires a concrete elemId".into()))?;
        if self.list(&op.obj)?.position_of(&elem_id).is_none() {
            return Err(EngineError::InvalidArgument(format!(
                "unknown list element {}",
                elem_id
            )));
        }

        match &op.action {
            OpType::Inc(delta) => {
                let list = self.list_mut(&op.obj)?;
                let pos = list.position_of(&elem_id).expect("checked above");
                for a in list.elements[pos].assignments.iter_mut() {
                    if op.pred.contains(&a.id) {
                        if let AssignedValue::Value(ScalarValue::Counter(v)) = &mut a.value {
                            *v += delta;
                        }
                    }
                }
                let index = list.visible_index_of(&elem_id).unwrap_or(0);
                Ok((
                    vec![Touch::ListUpdate {
                        obj: op.obj.clone(),
                        index,
                        elem_id,
                    }],
                    Vec::new(),
                ))
            }
            OpType::Del => {
                let list = self.list_mut(&op.obj)?;
                let pos = list.position_of(&elem_id).expect("checked above");
                let index = list.visible_index_of(&elem_id);
                remove_preds(&mut list.elements[pos].assignments, &op.pred);
                match index {
                    Some(index) => Ok((
                        vec![Touch::ListRemove {
                            obj: op.obj.clone(),
                            index,
                        }],
                        Vec::new(),
                    )),
                    None => Ok((Vec::new(), Vec::new())),
                }
            }
            OpType::Set(v) => {
                let list = self.list_mut(&op.obj)?;
                let pos = list.position_of(&elem_id).expect("checked above");
                remove_preds(&mut list.elements[pos].assignments, &op.pred);
                add_assignment(
                    &mut list.elements[pos].assignments,
                    id.clone(),
                    AssignedValue::Value(v.clone()),
                );
                let index = list.visible_index_of(&elem_id).unwrap_or(0);
                Ok((
                    vec![Touch::ListUpdate {
                        obj: op.obj.clone(),
                        index,
                        elem_id,
                    }],
                    Vec::new(),
                ))
            }
            OpType::Make(obj_type) => {
                let child = ObjId::Id(id.clone());
                self.objects.insert(child.clone(), ObjectState::new(*obj_type));
                self.parent_of.insert(child.clone(), op.obj.clone());
                let list = self.list_mut(&op.obj)?;
                let pos = list.position_of(&elem_id).expect("checked above");
                remove_preds(&mut list.elements[pos].assignments, &op.pred);
                add_assignment(
                    &mut list.elements[pos].assignments,
                    id.clone(),
                    AssignedValue::Object(child.clone(), *obj_type),
                );
                let index = list.visible_index_of(&elem_id).unwrap_or(0);
                Ok((
                    vec![Touch::ListUpdate {
                        obj: op.obj.clone(),
                        index,
                        elem_id,
                    }],
                    vec![child],
                ))
            }
            OpType::Link(target) => {
                let target_type = self.obj_type_of(target)?;
                let list = self.list_mut(&op.obj)?;
                let pos = list.position_of(&elem_id).expect("checked above");
                remove_preds(&mut list.elements[pos].assignments, &op.pred);
                add_assignment(
                    &mut list.elements[pos].assignments,
                    id.clone(),
                    AssignedValue::Object(target.clone(), target_type),
                );
                let index = list.visible_index_of(&elem_id).unwrap_or(0);
                Ok((
                    vec![Touch::ListUpdate {
                        obj: op.obj.clone(),
                        index,
                        elem_id,
                    }],
                    Vec::new(),
                ))
            }
            OpType::MultiSet(_) => unreachable!("expanded before reaching apply_list_update"),
        }
    }

    /// A run of `n` consecutive primitive inserts sharing one base elemId (§3 `multiOp`):
    /// expanded here into `n` individual inserts, each chained off the previous one's freshly
    /// minted id, with counters incrementing by one per element.
    fn apply_multi_set(
        &mut self,
        id: OpId,
        op: &Op,
        values: &[ScalarValue],
    ) -> Result<(Vec<Touch>, Vec<ObjId>), EngineError> {
        let mut touches = Vec::new();
        let mut reference_key = op.key.clone();
        let mut counter = id.counter;
        for value in values {
            let elem_op = Op {
                action: OpType::Set(value.clone()),
                obj: op.obj.clone(),
                key: reference_key.clone(),
                insert: true,
                pred: Vec::new(),
            };
            let elem_id = OpId::new(counter, &id.actor);
            let (t, _) = self.apply_list_insert(elem_id.clone(), &elem_op, Some(value.clone()))?;
            touches.extend(t);
            reference_key = weft_protocol::Key::from(weft_protocol::ElemId::Id(elem_id));
            counter += 1;
        }
        Ok((touches, Vec::new()))
    }

    /// Applies every op in a change, in order, assigning ids `start_op, start_op+1, ..`
    /// (a `MultiSet` op of `n` values consumes `n` counters). Returns the patch fragment this
    /// change caused.
    pub fn apply_change(
        &mut self,
        actor: &weft_protocol::ActorId,
        start_op: u64,
        ops: &[Op],
    ) -> Result<Patch, EngineError> {
        let mut touches = Vec::new();
        let mut created = FxHashSet::default();
        let mut counter = start_op;
        for op in ops {
            let id = OpId::new(counter, actor);
            let width = match &op.action {
                OpType::MultiSet(values) => values.len() as u64,
                _ => 1,
            };
            let (t, c) = self.apply_op(id, op)?;
            touches.extend(t);
            created.extend(c);
            counter += width.max(1);
        }
        Ok(self.build_patch(&touches, &created))
    }

    fn touched_objects(&self, touches: &[Touch]) -> FxHashSet<ObjId> {
        let mut objs = FxHashSet::default();
        for t in touches {
            match t {
                Touch::MapKey(o, _)
                | Touch::ListInsert { obj: o, .. }
                | Touch::ListUpdate { obj: o, .. }
                | Touch::ListRemove { obj: o, .. } => {
                    objs.insert(o.clone());
                }
            }
        }
        let mut frontier: Vec<ObjId> = objs.iter().cloned().collect();
        while let Some(o) = frontier.pop() {
            if let Some(parent) = self.parent_of.get(&o) {
                if objs.insert(parent.clone()) {
                    frontier.push(parent.clone());
                }
            }
        }
        objs
    }

    fn build_patch(&self, touches: &[Touch], created: &FxHashSet<ObjId>) -> Patch {
        let touched = self.touched_objects(touches);
        let mut shapes: FxHashMap<ObjId, Vec<EditShape>> = FxHashMap::default();
        for t in touches {
            match t {
                Touch::MapKey(_, _) => {}
                Touch::ListInsert { obj, index, elem_id } => {
                    shapes.entry(obj.clone()).or_default().push(EditShape::Insert {
                        index: *index,
                        elem_id: elem_id.clone(),
                    });
                }
                Touch::ListUpdate { obj, index, elem_id } => {
                    shapes.entry(obj.clone()).or_default().push(EditShape::Update {
                        index: *index,
                        elem_id: elem_id.clone(),
                    });
                }
                Touch::ListRemove { obj, index } => {
                    shapes
                        .entry(obj.clone())
                        .or_default()
                        .push(EditShape::Remove { index: *index, count: 1 });
                }
            }
        }
        let root_diff = self.diff_for_object(&ObjId::Root, &touched, created, &shapes);
        Patch {
            diffs: Some(root_diff),
            deps: Vec::new(),
            max_op: 0,
            clock: HashMap::new(),
            actor: None,
            seq: None,
            pending_changes: 0,
        }
    }

    /// The diff value a map key's currently-winning (or any named) assignment should carry:
    /// a full recursive diff for an object created this change, an empty placeholder diff for
    /// a reference to a pre-existing, untouched object, or the scalar itself.
    fn diff_for_assigned(
        &self,
        assigned: &AssignedValue,
        touched: &FxHashSet<ObjId>,
        created: &FxHashSet<ObjId>,
        shapes: &FxHashMap<ObjId, Vec<EditShape>>,
    ) -> Diff {
        match assigned {
            AssignedValue::Value(v) => Diff::Value(v.clone()),
            AssignedValue::Object(obj, _) if created.contains(obj) || touched.contains(obj) => {
                self.diff_for_object(obj, touched, created, shapes)
            }
            AssignedValue::Object(obj, t) if t.is_sequence() => Diff::List(ListDiff {
                object_id: obj.clone(),
                edits: Vec::new(),
            }),
            AssignedValue::Object(obj, _) => Diff::Map(MapDiff {
                object_id: obj.clone(),
                props: HashMap::new(),
            }),
        }
    }

    fn diff_for_object(
        &self,
        obj: &ObjId,
        touched: &FxHashSet<ObjId>,
        created: &FxHashSet<ObjId>,
        shapes: &FxHashMap<ObjId, Vec<EditShape>>,
    ) -> Diff {
        match self.objects.get(obj) {
            Some(ObjectState::Map(_, map)) => self.map_diff(obj, map, touched, created, shapes),
            Some(ObjectState::List(_, list)) => self.list_diff(obj, list, touched, created, shapes),
            None => Diff::Map(MapDiff {
                object_id: obj.clone(),
                props: HashMap::new(),
            }),
        }
    }

    fn map_diff(
        &self,
        obj: &ObjId,
        map: &MapState,
        touched: &FxHashSet<ObjId>,
        created: &FxHashSet<ObjId>,
        shapes: &FxHashMap<ObjId, Vec<EditShape>>,
    ) -> Diff {
        let mut props = HashMap::new();
        for (key, assignments) in &map.props {
            let mut inner = HashMap::new();
            for a in assignments {
                inner.insert(a.id.clone(), self.diff_for_assigned(&a.value, touched, created, shapes));
            }
            props.insert(key.clone(), inner);
        }
        Diff::Map(MapDiff {
            object_id: obj.clone(),
            props,
        })
    }

    fn list_diff(
        &self,
        obj: &ObjId,
        list: &ListState,
        touched: &FxHashSet<ObjId>,
        created: &FxHashSet<ObjId>,
        shapes: &FxHashMap<ObjId, Vec<EditShape>>,
    ) -> Diff {
        let mut edits = Vec::new();
        if let Some(shape) = shapes.get(obj) {
            for s in shape {
                match s {
                    EditShape::Insert { index, elem_id } | EditShape::Update { index, elem_id } => {
                        let value = list
                            .position_of(elem_id)
                            .and_then(|pos| list.elements[pos].assignments.first())
                            .map(|a| self.diff_for_assigned(&a.value, touched, created, shapes))
                            .unwrap_or(Diff::Value(ScalarValue::Null));
                        if matches!(s, EditShape::Insert { .. }) {
                            edits.push(DiffEdit::Insert {
                                index: *index,
                                elem_id: elem_id.clone(),
                                value,
                            });
                        } else {
                            edits.push(DiffEdit::Update {
                                index: *index,
                                op_id: elem_id.clone(),
                                value,
                            });
                        }
                    }
                    EditShape::Remove { index, count } => {
                        edits.push(DiffEdit::Remove {
                            index: *index,
                            count: *count,
                        });
                    }
                }
            }
        }
        Diff::List(ListDiff {
            object_id: obj.clone(),
            edits,
        })
    }

    /// A patch reflecting the entire current document state, for `Backend::get_patch`/`load`.
    pub fn full_patch(&self) -> Patch {
        let touched: FxHashSet<ObjId> = self.objects.keys().cloned().collect();
        let created: FxHashSet<ObjId> = FxHashSet::default();
        let mut shapes: FxHashMap<ObjId, Vec<EditShape>> = FxHashMap::default();
        for (obj, state) in &self.objects {
            if let ObjectState::List(_, list) = state {
                let mut index = 0;
                let mut edits = Vec::new();
                for elem in &list.elements {
                    if elem.is_visible() {
                        edits.push(EditShape::Insert {
                            index,
                            elem_id: elem.id.clone(),
                        });
                        index += 1;
                    }
                }
                shapes.insert(obj.clone(), edits);
            }
        }
        let root_diff = self.diff_for_object(&ObjId::Root, &touched, &created, &shapes);
        Patch {
            diffs: Some(root_diff),
            deps: Vec::new(),
            max_op: 0,
            clock: HashMap::new(),
            actor: None,
            seq: None,
            pending_changes: 0,
        }
    }
}

enum EditShape {
    Insert { index: usize, elem_id: OpId },
    Update { index: usize, elem_id: OpId },
    Remove { index: usize, count: usize },
}
