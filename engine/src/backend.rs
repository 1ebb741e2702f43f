//! Ties the causal [`History`](crate::history::History) and the [`OpSet`](crate::op_set::OpSet)
//! together into the engine's top-level handle (§2, §4.2, §4.5). Grounded on automerge-rs's
//! `Backend`, which plays the same role against its own `history`/`op_set` pair; the queueing
//! and causal-readiness bookkeeping done inline there is delegated here to `History`.

use tracing::{instrument, warn};
use weft_protocol::{Change as LogicalChange, ChangeHash, Patch};

use crate::{
    change::{decode_document, encode_document, Change},
    error::EngineError,
    history::{History, Insertion},
    op_set::OpSet,
};

/// A single replica's view of one document: the changes it has seen (via [`History`]) and the
/// CRDT state those changes have produced (via [`OpSet`]). Not `Sync`: per §5, one instance must
/// only ever be driven from one thread at a time.
#[derive(Default)]
pub struct Backend {
    history: History,
    op_set: OpSet,
}

impl Backend {
    pub fn new() -> Self {
        Backend {
            history: History::new(),
            op_set: OpSet::new(),
        }
    }

    pub fn heads(&self) -> Vec<ChangeHash> {
        self.history.heads()
    }

    /// Records a locally-authored change: its `deps` are overwritten with the current heads so
    /// a recorder never has to track them itself, then it's applied exactly like a remote
    /// change. Returns the encoded change (for the caller to persist/broadcast) and the patch
    /// it produced.
    #[instrument(skip(self, mutator_ops), fields(actor = %actor))]
    pub fn apply_local_change(
        &mut self,
        actor: weft_protocol::ActorId,
        message: Option<String>,
        mutator_ops: Vec<weft_protocol::Op>,
    ) -> Result<(Change, Patch), EngineError> {
        let seq = self.history.next_seq(&actor);
        let start_op = self.op_set_next_op();
        let logical = LogicalChange {
            actor,
            seq,
            start_op,
            time: crate::time::now_millis(),
            message,
            deps: self.heads(),
            ops: mutator_ops,
        };
        let change = Change::encode(logical);
        let patch = self.apply_changes(vec![change.clone()])?;
        Ok((change, patch))
    }

    fn op_set_next_op(&self) -> u64 {
        self.history
            .all_changes()
            .iter()
            .map(|c| c.max_op())
            .max()
            .unwrap_or(0)
            + 1
    }

    /// The counter the next op authored against this backend will be assigned, i.e. the
    /// `startOp` a caller building ops ahead of time (a recorder) must use so its own id
    /// bookkeeping agrees with what [`apply_local_change`](Self::apply_local_change) assigns.
    pub fn next_op_counter(&self) -> u64 {
        self.op_set_next_op()
    }

    /// Feeds a batch of changes (local or remote) through the [`History`] and applies every
    /// change this makes causally ready against the [`OpSet`], merging their patches in the
    /// order they were applied. A change missing a dependency is parked silently (§7's
    /// propagation policy for `MissingDependency`), not surfaced as an error here.
    #[instrument(skip(self, changes))]
    pub fn apply_changes(&mut self, changes: Vec<Change>) -> Result<Patch, EngineError> {
        let mut patch = Patch::empty();
        for change in changes {
            self.apply_one(change, &mut patch)?;
        }
        Ok(patch)
    }

    /// Like [`apply_changes`](Self::apply_changes) but discards the patch, for bulk loads where
    /// the caller only wants the final state (mirrors automerge-rs's `load_changes`).
    pub fn load_changes(&mut self, changes: Vec<Change>) -> Result<(), EngineError> {
        let mut patch = Patch::empty();
        for change in changes {
            self.apply_one(change, &mut patch)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, change: Change, patch: &mut Patch) -> Result<(), EngineError> {
        match self.history.insert(change)? {
            Insertion::Duplicate => {}
            Insertion::Pending => {}
            Insertion::Applied(ready) => {
                for change in ready {
                    let applied = self.op_set.apply_change(&change.actor, change.start_op, &change.ops)?;
                    merge_patch(patch, applied);
                }
            }
        }
        Ok(())
    }

    /// A patch describing the whole current document, for a freshly-loaded or freshly-opened
    /// backend (mirrors automerge-rs's `get_patch`).
    pub fn get_patch(&self) -> Patch {
        self.op_set.full_patch()
    }

    pub fn get_changes(&self, have_deps: &[ChangeHash]) -> Vec<&Change> {
        self.history.changes_since(have_deps)
    }

    pub fn get_missing_deps(&self, extra_heads: &[ChangeHash]) -> Vec<ChangeHash> {
        self.history.missing_deps(extra_heads)
    }

    pub fn get_change_by_hash(&self, hash: &ChangeHash) -> Option<&Change> {
        self.history.get(hash)
    }

    /// The columnar document encoding (§6): every known change in canonical topological order,
    /// ties broken by hash ascending.
    pub fn save(&self) -> Vec<u8> {
        let mut changes: Vec<Change> = self.history.all_changes().into_iter().cloned().collect();
        changes.sort_by(|a, b| a.hash().cmp(&b.hash()));
        encode_document(&changes)
    }

    #[instrument(skip(data))]
    pub fn load(data: &[u8]) -> Result<Self, EngineError> {
        let changes = decode_document(data)?;
        let mut backend = Self::new();
        backend.load_changes(changes)?;
        Ok(backend)
    }
}

/// Folds one change's patch into the running batch patch. Both patches describe the same root
/// object so this is a shallow merge: later map-key/list-edit entries for an object replace or
/// append to earlier ones, since a later change's view of a key supersedes an earlier one's.
fn merge_patch(acc: &mut Patch, next: Patch) {
    match (&mut acc.diffs, next.diffs) {
        (acc_diff @ None, next_diff) => *acc_diff = next_diff,
        (Some(weft_protocol::Diff::Map(acc_map)), Some(weft_protocol::Diff::Map(next_map))) => {
            for (key, versions) in next_map.props {
                acc_map.props.insert(key, versions);
            }
        }
        (acc_diff, next_diff) => {
            warn!("merging incompatible root diffs; keeping the later one");
            *acc_diff = next_diff;
        }
    }
}
