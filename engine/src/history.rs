//! The causal history DAG (§3 component 3, kept as its own module distinct from the OpSet per
//! the op set's component boundary, a deliberate structural split from automerge-rs's `Backend`,
//! which folds history bookkeeping and op-set state into one struct). Owns every known change,
//! tracks per-actor sequence numbers, the current frontier ("heads"), and changes parked
//! pending a missing dependency.

use fxhash::{FxHashMap, FxHashSet};
use weft_protocol::{ActorId, ChangeHash};

use crate::{change::Change, error::EngineError};

#[derive(Default)]
pub(crate) struct History {
    by_hash: FxHashMap<ChangeHash, Change>,
    by_actor: FxHashMap<ActorId, Vec<ChangeHash>>,
    /// Hashes with no known change depending on them: the current frontier.
    heads: FxHashSet<ChangeHash>,
    /// Changes not yet committed because at least one dep is missing, keyed by their own hash
    /// so a change is held exactly once no matter how many deps it's waiting on.
    pending: FxHashMap<ChangeHash, Change>,
    /// Reverse index from a still-missing dep hash to the hashes of pending changes waiting on
    /// it; a pending change is listed once per dep it's still missing, never duplicated per dep.
    waiters: FxHashMap<ChangeHash, Vec<ChangeHash>>,
}

#[derive(Debug)]
pub(crate) enum Insertion {
    /// Applied immediately; carries the changes that became applicable as a result (this one
    /// first, followed by any pending changes it happened to unblock, in dependency order).
    Applied(Vec<Change>),
    /// Not a duplicate, but missing at least one dependency; parked until it arrives.
    Pending,
    /// Already known; a no-op.
    Duplicate,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    pub fn get(&self, hash: &ChangeHash) -> Option<&Change> {
        self.by_hash.get(hash)
    }

    pub fn heads(&self) -> Vec<ChangeHash> {
        let mut heads: Vec<_> = self.heads.iter().copied().collect();
        heads.sort();
        heads
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// The next sequence number this actor should use.
    pub fn next_seq(&self, actor: &ActorId) -> u64 {
        self.by_actor.get(actor).map_or(1, |v| v.len() as u64 + 1)
    }

    fn has_all_deps(&self, change: &Change) -> bool {
        change.deps.iter().all(|d| self.by_hash.contains_key(d))
    }

    /// Inserts `change`, validating its sequence number against what this actor has
    /// contributed so far. Returns the transitive set of changes this insertion makes
    /// immediately applicable, in the order a caller should feed them to the `OpSet`.
    pub fn insert(&mut self, change: Change) -> Result<Insertion, EngineError> {
        let hash = change.hash();
        if self.by_hash.contains_key(&hash) || self.pending.contains_key(&hash) {
            return Ok(Insertion::Duplicate);
        }
        let expected_seq = self.next_seq(&change.actor);
        if change.seq != expected_seq {
            return Err(EngineError::DuplicateSeq {
                actor: change.actor.to_hex_string(),
                seq: change.seq,
            });
        }
        if !self.has_all_deps(&change) {
            self.park(change);
            return Ok(Insertion::Pending);
        }
        let mut newly_applied = vec![change];
        let mut i = 0;
        while i < newly_applied.len() {
            let hash = newly_applied[i].hash();
            self.commit(&newly_applied[i]);
            if let Some(waiting) = self.waiters.remove(&hash) {
                for candidate_hash in waiting {
                    let ready = self
                        .pending
                        .get(&candidate_hash)
                        .map_or(false, |c| self.has_all_deps(c));
                    if ready {
                        let candidate = self.pending.remove(&candidate_hash).expect("checked above");
                        newly_applied.push(candidate);
                    }
                }
            }
            i += 1;
        }
        Ok(Insertion::Applied(newly_applied))
    }

    /// Registers `change` as waiting on every dep it's still missing. A change is parked exactly
    /// once, under `pending[hash]`; `waiters` only ever grows a reverse index into it, so a dep
    /// arriving never re-queues a change that's already parked under a different missing dep.
    fn park(&mut self, change: Change) {
        let hash = change.hash();
        for dep in &change.deps {
            if !self.by_hash.contains_key(dep) {
                self.waiters.entry(*dep).or_default().push(hash);
            }
        }
        self.pending.insert(hash, change);
    }

    fn commit(&mut self, change: &Change) {
        let hash = change.hash();
        for dep in &change.deps {
            self.heads.remove(dep);
        }
        self.heads.insert(hash);
        self.by_actor.entry(change.actor.clone()).or_default().push(hash);
        self.by_hash.insert(hash, change.clone());
    }

    /// Every dep named anywhere that isn't itself present, restricted to what `extra_heads`
    /// (if given) would additionally require — used to answer "what do I still need".
    pub fn missing_deps(&self, extra_heads: &[ChangeHash]) -> Vec<ChangeHash> {
        let mut missing: FxHashSet<ChangeHash> = self.waiters.keys().copied().collect();
        for h in extra_heads {
            if !self.by_hash.contains_key(h) {
                missing.insert(*h);
            }
        }
        let mut out: Vec<_> = missing.into_iter().collect();
        out.sort();
        out
    }

    /// Every change not transitively reachable from `have_deps`, in an order where each
    /// change's deps appear before it (a valid application order for the receiver).
    pub fn changes_since(&self, have_deps: &[ChangeHash]) -> Vec<&Change> {
        let have: FxHashSet<ChangeHash> = have_deps.iter().copied().collect();
        let mut reachable: FxHashSet<ChangeHash> = FxHashSet::default();
        let mut frontier: Vec<ChangeHash> = have.iter().copied().collect();
        while let Some(h) = frontier.pop() {
            if let Some(c) = self.by_hash.get(&h) {
                for d in &c.deps {
                    if reachable.insert(*d) {
                        frontier.push(*d);
                    }
                }
            }
        }
        reachable.extend(have.iter().copied());

        let mut result = Vec::new();
        let mut emitted: FxHashSet<ChangeHash> = FxHashSet::default();
        let mut all_hashes: Vec<ChangeHash> = self.by_hash.keys().copied().collect();
        all_hashes.sort();
        loop {
            let mut progressed = false;
            for hash in &all_hashes {
                if emitted.contains(hash) || reachable.contains(hash) {
                    continue;
                }
                let change = &self.by_hash[hash];
                if change.deps.iter().all(|d| reachable.contains(d) || emitted.contains(d)) {
                    result.push(change);
                    emitted.insert(*hash);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        result
    }

    pub fn all_changes(&self) -> Vec<&Change> {
        self.changes_since(&[])
    }
}

#[cfg(test)]
mod tests {
    use weft_protocol::{ActorId, Change as LogicalChange, Key, ObjId, OpType, ScalarValue};

    use super::*;

    fn change(actor: &ActorId, seq: u64, start_op: u64, deps: Vec<ChangeHash>) -> Change {
        Change::encode(LogicalChange {
            actor: actor.clone(),
            seq,
            start_op,
            time: seq as i64,
            message: None,
            deps,
            ops: vec![weft_protocol::Op {
                action: OpType::Set(ScalarValue::from(seq as i64)),
                obj: ObjId::Root,
                key: Key::from("k"),
                insert: false,
                pred: vec![],
            }],
        })
    }

    /// Regression test for a change with two initially-missing deps being applied to the op set
    /// twice: the first dep arriving used to re-park the change under the remaining dep,
    /// appending a second copy to `pending` that both got promoted and committed once the last
    /// dep showed up.
    #[test]
    fn a_change_with_two_missing_deps_is_applied_exactly_once() {
        let actor_a = ActorId::random();
        let actor_b = ActorId::random();
        let actor_c = ActorId::random();

        let dep1 = change(&actor_a, 1, 1, vec![]);
        let dep2 = change(&actor_b, 1, 1, vec![]);
        // A fresh third actor so `merge`'s own seq (1) doesn't also depend on `dep1` having
        // committed first -- the two missing deps it's parked on are purely a causal-hash
        // matter, not a per-actor sequencing one.
        let merge = change(&actor_c, 1, 2, vec![dep1.hash(), dep2.hash()]);

        let mut history = History::new();
        assert!(matches!(history.insert(merge.clone()).unwrap(), Insertion::Pending));

        match history.insert(dep1.clone()).unwrap() {
            Insertion::Applied(applied) => assert_eq!(applied, vec![dep1.clone()]),
            other => panic!("expected only dep1 to apply while dep2 is still missing, got {:?}", other),
        }

        match history.insert(dep2.clone()).unwrap() {
            Insertion::Applied(applied) => assert_eq!(applied, vec![dep2.clone(), merge.clone()]),
            other => panic!("expected dep2 and the merge to apply together exactly once, got {:?}", other),
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.heads(), vec![merge.hash()]);
    }

    #[test]
    fn a_duplicate_change_while_still_pending_is_a_no_op() {
        let dep_actor = ActorId::random();
        let waiting_actor = ActorId::random();
        let dep = change(&dep_actor, 1, 1, vec![]);
        let waiting = change(&waiting_actor, 1, 2, vec![dep.hash()]);

        let mut history = History::new();
        assert!(matches!(history.insert(waiting.clone()).unwrap(), Insertion::Pending));
        assert!(matches!(history.insert(waiting).unwrap(), Insertion::Duplicate));
    }
}
