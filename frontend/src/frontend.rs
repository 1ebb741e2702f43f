//! The reference `Frontend`: owns a `Backend` directly rather than exchanging patches across a
//! worker boundary (§5 makes this legitimate -- the engine is single-threaded and synchronous,
//! so there is no separate backend thread for `automerge-frontend`'s split to isolate). Grounded
//! in `automerge-frontend/src/frontend.rs`'s `Frontend<T>`: same `actor_id`/`seq`/cached-value
//! shape, same `change`/`apply_patch` contract, minus the timestamper generic (this reference
//! always stamps wall-clock time, via the engine's own clock) and minus the `Options`/`Schema`
//! construction machinery that module needs for its sorted-map heuristics.

use std::collections::HashMap;

use tracing::instrument;
use weft_engine::{Backend, EngineError};
use weft_protocol::{ActorId, ObjId};

use crate::{
    doc::{Doc, Value},
    error::FrontendError,
    mutation::LocalChange,
};

pub struct Frontend {
    actor_id: ActorId,
    seq: u64,
    backend: Backend,
    doc: Doc,
    last_local_change: Option<weft_engine::Change>,
}

impl Default for Frontend {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontend {
    pub fn new() -> Self {
        Frontend {
            actor_id: ActorId::random(),
            seq: 0,
            backend: Backend::new(),
            doc: Doc::new(),
            last_local_change: None,
        }
    }

    pub fn with_actor_id(actor_id: ActorId) -> Self {
        let mut front = Self::new();
        front.actor_id = actor_id;
        front
    }

    pub fn get_actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn set_actor_id(&mut self, actor_id: ActorId) {
        self.actor_id = actor_id;
    }

    pub fn get_last_local_change(&self) -> Option<&weft_engine::Change> {
        self.last_local_change.as_ref()
    }

    pub fn get_object_by_id(&self, obj: &ObjId) -> Result<Value, FrontendError> {
        self.doc.value_at(obj)
    }

    pub fn get_object_id(&self, obj: &ObjId) -> Option<ObjId> {
        self.doc.object_exists(obj).then(|| obj.clone())
    }

    pub fn len(&self, obj: &ObjId) -> Result<usize, FrontendError> {
        self.doc.len(obj)
    }

    pub fn get_conflicts(&self, obj: &ObjId, key: &str) -> Result<Option<HashMap<weft_protocol::OpId, Value>>, FrontendError> {
        self.doc.get_conflicts(obj, key)
    }

    pub fn root(&self) -> ObjId {
        Doc::root()
    }

    /// Records a local change: runs `mutator` against a [`LocalChange`] recorder seeded from the
    /// current snapshot, hands the resulting ops to the backend, and merges the resulting patch
    /// back into the snapshot. Returns `None` for the change half if `mutator` recorded no ops,
    /// mirroring automerge-rs's "empty changes aren't sent" rule.
    #[instrument(skip(self, mutator), fields(actor = %self.actor_id))]
    pub fn change<F, O>(&mut self, message: Option<String>, mutator: F) -> Result<(O, Option<weft_engine::Change>), EngineError>
    where
        F: FnOnce(&mut LocalChange) -> O,
    {
        let start_op = self.backend.next_op_counter();
        let mut recorder = LocalChange::new(&self.doc, &self.actor_id, start_op);
        let result = mutator(&mut recorder);
        let ops = recorder.into_ops();

        if ops.is_empty() {
            return Ok((result, None));
        }

        let (change, patch) = self.backend.apply_local_change(self.actor_id.clone(), message, ops)?;
        self.doc.apply_patch(&patch).map_err(|_| EngineError::InvalidArgument("local patch did not apply cleanly".into()))?;
        self.seq += 1;
        self.last_local_change = Some(change.clone());
        Ok((result, Some(change)))
    }

    /// Merges a patch received from sync/load into the snapshot, advancing `seq` if the patch
    /// carries a newer clock entry for our own actor (e.g. after loading a document we already
    /// contributed to).
    #[instrument(skip(self, patch), fields(actor = %self.actor_id))]
    pub fn apply_patch(&mut self, patch: weft_protocol::Patch) -> Result<(), FrontendError> {
        if let Some(seq) = patch.clock.get(&self.actor_id) {
            if *seq > self.seq {
                self.seq = *seq;
            }
        }
        self.doc.apply_patch(&patch)
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    /// Refreshes the snapshot from the backend's own view, for use after [`backend_mut`] was
    /// driven directly (e.g. by a `Connection` applying a sync message).
    pub fn refresh(&mut self) -> Result<(), FrontendError> {
        let patch = self.backend.get_patch();
        self.doc = Doc::new();
        self.doc.apply_patch(&patch)
    }
}
