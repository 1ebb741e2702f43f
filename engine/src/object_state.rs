//! Per-object CRDT state (§4, §9): a `Map`/`Table` holds an active-assignment set per key, a
//! `List`/`Text` additionally orders its elements by the RGA rule. Grounded on automerge-rs's
//! `object_store.rs` `ObjectState`/`MapState`/`ListState` split, generalized to the explicit
//! `pred`-driven conflict model this op set uses instead of clocks-and-undo-ops.

use fxhash::FxHashMap;
use smol_str::SmolStr;
use weft_protocol::{ObjId, ObjType, OpId, ScalarValue};

/// What a surviving assignment in a conflict set points at: either a leaf scalar, or a
/// reference to a composite object (whose own state lives in `OpSet::objects`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AssignedValue {
    Value(ScalarValue),
    Object(ObjId, ObjType),
}

/// One surviving write to a key/element, named by the op that made it. Several of these with
/// the same key/element form a conflict set; the one with the greatest `id` is the visible
/// value (`Value`/`get`), the rest are visible only through `getConflicts`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assignment {
    pub id: OpId,
    pub value: AssignedValue,
}

/// Keeps a key's conflict set sorted with the winner (greatest `OpId`) first.
fn insert_sorted(set: &mut Vec<Assignment>, assignment: Assignment) {
    let pos = set
        .iter()
        .position(|a| a.id < assignment.id)
        .unwrap_or(set.len());
    set.insert(pos, assignment);
}

#[derive(Debug, Default)]
pub(crate) struct MapState {
    pub props: FxHashMap<SmolStr, Vec<Assignment>>,
}

impl MapState {
    fn new() -> Self {
        MapState {
            props: FxHashMap::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ListElement {
    /// The id of the op that inserted this element; doubles as its stable `ElemId`.
    pub id: OpId,
    pub assignments: Vec<Assignment>,
}

impl ListElement {
    pub fn is_visible(&self) -> bool {
        !self.assignments.is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ListState {
    pub elements: Vec<ListElement>,
}

impl ListState {
    fn new() -> Self {
        ListState {
            elements: Vec::new(),
        }
    }

    /// Index (in `elements`, tombstones included) of the element identified by `id`, if any.
    pub fn position_of(&self, id: &OpId) -> Option<usize> {
        self.elements.iter().position(|e| &e.id == id)
    }

    /// Where a new element referencing `after` should be spliced into `elements`: immediately
    /// after `after`, skipping any elements placed there by other inserts with a greater id
    /// (RGA tie-break: concurrent inserts at the same reference point order by `OpId`
    /// descending, so replay order doesn't affect the final sequence).
    pub fn insertion_point(&self, after: Option<&OpId>, new_id: &OpId) -> usize {
        let start = match after {
            None => 0,
            Some(id) => match self.position_of(id) {
                Some(p) => p + 1,
                None => self.elements.len(),
            },
        };
        let mut pos = start;
        while pos < self.elements.len() && &self.elements[pos].id > new_id {
            pos += 1;
        }
        pos
    }

    /// The index of `id` within the *visible* (non-tombstoned) sequence, if it is visible.
    pub fn visible_index_of(&self, id: &OpId) -> Option<usize> {
        let mut idx = 0;
        for e in &self.elements {
            if &e.id == id {
                return if e.is_visible() { Some(idx) } else { None };
            }
            if e.is_visible() {
                idx += 1;
            }
        }
        None
    }

    /// The count of visible elements strictly before position `pos` in `elements`.
    pub fn visible_count_before(&self, pos: usize) -> usize {
        self.elements[..pos].iter().filter(|e| e.is_visible()).count()
    }
}

#[derive(Debug)]
pub(crate) enum ObjectState {
    Map(ObjType, MapState),
    List(ObjType, ListState),
}

impl ObjectState {
    pub fn new(obj_type: ObjType) -> Self {
        if obj_type.is_sequence() {
            ObjectState::List(obj_type, ListState::new())
        } else {
            ObjectState::Map(obj_type, MapState::new())
        }
    }

    pub fn obj_type(&self) -> ObjType {
        match self {
            ObjectState::Map(t, _) => *t,
            ObjectState::List(t, _) => *t,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut MapState> {
        match self {
            ObjectState::Map(_, m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListState> {
        match self {
            ObjectState::List(_, l) => Some(l),
            _ => None,
        }
    }
}

pub(crate) fn remove_preds(set: &mut Vec<Assignment>, pred: &[OpId]) {
    set.retain(|a| !pred.contains(&a.id));
}

pub(crate) fn add_assignment(set: &mut Vec<Assignment>, id: OpId, value: AssignedValue) {
    insert_sorted(set, Assignment { id, value });
}
