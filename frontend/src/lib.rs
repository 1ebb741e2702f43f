//! A minimal reference implementation of the Frontend Interface contract (§4.5): an immutable
//! [`Doc`] snapshot, a [`LocalChange`] recorder for building ops, and a [`Frontend`] tying both
//! to a `weft-engine` `Backend`. Not part of the engine's tested contract surface -- it exists so
//! a host can be written against a concrete, working example, the way `automerge-frontend` sits
//! alongside its exhaustively-tested `automerge-backend`.

mod doc;
mod error;
mod frontend;
mod mutation;

pub use doc::{Doc, Value};
pub use error::FrontendError;
pub use frontend::Frontend;
pub use mutation::LocalChange;

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use pretty_assertions::assert_eq;
    use weft_protocol::ScalarValue;

    use super::*;

    #[test]
    fn map_set_is_visible_after_change() {
        let mut front = Frontend::new();
        let root = front.root();
        let (_, change) = front
            .change(Some("set bird".into()), |doc| {
                doc.set(&root, "bird", "magpie");
            })
            .unwrap();
        assert!(change.is_some());
        assert_eq!(
            front.get_object_by_id(&root).unwrap(),
            Value::Map(hashmap! {
                "bird".into() => Value::Primitive(ScalarValue::from("magpie")),
            })
        );
    }

    #[test]
    fn concurrent_conflicting_sets_resolve_to_the_same_winner_on_both_sides() {
        let mut a = Frontend::new();
        let mut b = Frontend::new();
        let root = a.root();

        a.change(None, |doc| doc.set(&root, "bird", "magpie")).unwrap();
        b.change(None, |doc| doc.set(&root, "bird", "blackbird")).unwrap();

        let a_change = a.get_last_local_change().unwrap().clone();
        let b_change = b.get_last_local_change().unwrap().clone();

        let patch_for_a = a.backend_mut().apply_changes(vec![b_change]).unwrap();
        a.apply_patch(patch_for_a).unwrap();
        let patch_for_b = b.backend_mut().apply_changes(vec![a_change]).unwrap();
        b.apply_patch(patch_for_b).unwrap();

        assert_eq!(a.get_object_by_id(&root).unwrap(), b.get_object_by_id(&root).unwrap());

        let conflicts = a.get_conflicts(&root, "bird").unwrap().unwrap();
        assert_eq!(conflicts.len(), 2);
    }

    #[test]
    fn list_insert_then_delete_leaves_it_empty() {
        let mut front = Frontend::new();
        let root = front.root();
        let (birds, _) = front
            .change(None, |doc| {
                let birds = doc.create_list(&root, "birds");
                doc.insert(&birds, 0, "chaffinch").unwrap();
                birds
            })
            .unwrap();

        assert_eq!(front.len(&birds).unwrap(), 1);

        front.change(None, |doc| doc.delete_index(&birds, 0).unwrap()).unwrap();
        assert_eq!(front.len(&birds).unwrap(), 0);
    }

    #[test]
    fn counter_set_then_increment_settles_on_the_summed_value() {
        let mut front = Frontend::new();
        let root = front.root();

        front.change(None, |doc| doc.set(&root, "counter", ScalarValue::Counter(1))).unwrap();
        front.change(None, |doc| doc.increment(&root, "counter", 2)).unwrap();

        assert_eq!(
            front.get_object_by_id(&root).unwrap(),
            Value::Map(hashmap! {
                "counter".into() => Value::Primitive(ScalarValue::Counter(3)),
            })
        );
    }

    fn sync(a: &mut Frontend, b: &mut Frontend) {
        let a_change = a.get_last_local_change().unwrap().clone();
        let b_change = b.get_last_local_change().unwrap().clone();
        let patch_for_a = a.backend_mut().apply_changes(vec![b_change]).unwrap();
        a.apply_patch(patch_for_a).unwrap();
        let patch_for_b = b.backend_mut().apply_changes(vec![a_change]).unwrap();
        b.apply_patch(patch_for_b).unwrap();
    }

    #[test]
    fn offline_bidirectional_edits_on_distinct_keys_merge_cleanly() {
        let mut l = Frontend::new();
        let root = l.root();
        l.change(None, |doc| doc.set(&root, "swallows", 1)).unwrap();

        let l_seed = l.get_last_local_change().unwrap().clone();
        let mut r = Frontend::with_actor_id(weft_protocol::ActorId::random());
        let seed_patch = r.backend_mut().apply_changes(vec![l_seed]).unwrap();
        r.apply_patch(seed_patch).unwrap();

        l.change(None, |doc| doc.set(&root, "wrens", 1)).unwrap();
        r.change(None, |doc| doc.set(&root, "robins", 1)).unwrap();
        sync(&mut l, &mut r);

        let expected = Value::Map(hashmap! {
            "swallows".into() => Value::Primitive(ScalarValue::from(1_i64)),
            "wrens".into() => Value::Primitive(ScalarValue::from(1_i64)),
            "robins".into() => Value::Primitive(ScalarValue::from(1_i64)),
        });
        assert_eq!(l.get_object_by_id(&root).unwrap(), expected);
        assert_eq!(r.get_object_by_id(&root).unwrap(), expected);
    }

    #[test]
    fn offline_conflict_on_the_same_key_converges_with_the_loser_in_conflicts() {
        let mut l = Frontend::new();
        let root = l.root();
        l.change(None, |doc| doc.set(&root, "swallows", 1)).unwrap();

        let l_seed = l.get_last_local_change().unwrap().clone();
        let mut r = Frontend::with_actor_id(weft_protocol::ActorId::random());
        let seed_patch = r.backend_mut().apply_changes(vec![l_seed]).unwrap();
        r.apply_patch(seed_patch).unwrap();

        l.change(None, |doc| doc.set(&root, "swallows", 13)).unwrap();
        r.change(None, |doc| doc.set(&root, "swallows", 42)).unwrap();
        sync(&mut l, &mut r);

        assert_eq!(l.get_object_by_id(&root).unwrap(), r.get_object_by_id(&root).unwrap());
        let conflicts = l.get_conflicts(&root, "swallows").unwrap().unwrap();
        assert_eq!(conflicts.len(), 2);
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use weft_protocol::{ActorId, ScalarValue};

    use super::*;

    fn key_strategy() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("swallows"), Just("wrens"), Just("robins")]
    }

    proptest! {
        /// Two replicas that diverge offline on arbitrary keys and then exchange their local
        /// changes converge to the same snapshot (§8 convergence), regardless of which key each
        /// edit landed on or how many edits either side made.
        #[test]
        fn two_replicas_converge_after_exchanging_offline_edits(
            left_edits in prop::collection::vec((key_strategy(), 0i64..1_000), 0..6),
            right_edits in prop::collection::vec((key_strategy(), 0i64..1_000), 0..6),
        ) {
            let mut l = Frontend::new();
            let mut r = Frontend::with_actor_id(ActorId::random());
            let root = l.root();

            let mut l_changes = Vec::new();
            for (key, value) in &left_edits {
                let (_, change) = l.change(None, |doc| doc.set(&root, *key, ScalarValue::from(*value))).unwrap();
                l_changes.extend(change);
            }
            let mut r_changes = Vec::new();
            for (key, value) in &right_edits {
                let (_, change) = r.change(None, |doc| doc.set(&root, *key, ScalarValue::from(*value))).unwrap();
                r_changes.extend(change);
            }

            if !r_changes.is_empty() {
                let patch = l.backend_mut().apply_changes(r_changes).unwrap();
                l.apply_patch(patch).unwrap();
            }
            if !l_changes.is_empty() {
                let patch = r.backend_mut().apply_changes(l_changes).unwrap();
                r.apply_patch(patch).unwrap();
            }

            prop_assert_eq!(l.get_object_by_id(&root).unwrap(), r.get_object_by_id(&root).unwrap());
        }
    }
}
