#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::similar_names)]
#![allow(clippy::shadow_unrelated)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::use_self)]
#![allow(clippy::too_many_lines)]

//! The replication substrate: the causal history DAG, the OpSet CRDT engine, the columnar
//! wire codec, and the peer-to-peer sync protocol (components 2-8 of the overview). The
//! `weft-protocol` crate owns the shared id/value/op vocabulary; this crate owns everything
//! that mutates or transmits it.

mod backend;
mod change;
mod columnar;
mod connection;
mod encoding;
mod error;
mod history;
mod object_state;
mod op_set;
mod sync;
mod time;

pub use backend::Backend;
pub use change::{Change, MAGIC_BYTES};
pub use connection::{Connection, DocMessage, DocSet};
pub use error::EngineError;
pub use sync::{BloomFilter, SyncHave, SyncMessage, SyncState, BITS_PER_ENTRY, NUM_PROBES};

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    use weft_protocol::{ActorId, Key, ObjId, OpType, ScalarValue};

    use super::*;

    #[test]
    fn sync_and_send_backend() {
        let b = Backend::new();
        let mb = Arc::new(Mutex::new(b));
        thread::spawn(move || {
            let b = mb.lock().unwrap();
            b.get_changes(&[]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn local_change_round_trips_through_save_and_load() {
        let mut backend = Backend::new();
        let actor = ActorId::random();
        backend
            .apply_local_change(
                actor,
                Some("set bird".into()),
                vec![weft_protocol::Op {
                    action: OpType::Set(ScalarValue::from("magpie")),
                    obj: ObjId::Root,
                    key: Key::from("bird"),
                    insert: false,
                    pred: vec![],
                }],
            )
            .unwrap();

        let bytes = backend.save();
        let reloaded = Backend::load(&bytes).unwrap();
        assert_eq!(reloaded.heads(), backend.heads());
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use weft_protocol::{ActorId, Key, ObjId, Op, OpType, ScalarValue};

    use super::*;

    fn set_op(key: &str, value: i64) -> Op {
        Op {
            action: OpType::Set(ScalarValue::from(value)),
            obj: ObjId::Root,
            key: Key::from(key),
            insert: false,
            pred: vec![],
        }
    }

    fn key_strategy() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("a"), Just("b"), Just("c")]
    }

    proptest! {
        /// Applying the same change twice through `apply_changes` must be a no-op the second
        /// time (§8 idempotence): this is exactly what the `History` pending-queue dedup fix
        /// guards against -- a change double-registered as pending would otherwise be
        /// double-committed once its last dependency arrived.
        #[test]
        fn applying_a_change_twice_is_idempotent(key in key_strategy(), value in 0i64..1_000) {
            let mut backend = Backend::new();
            let actor = ActorId::random();
            let (change, _) = backend
                .apply_local_change(actor, None, vec![set_op(key, value)])
                .unwrap();

            let heads_before = backend.heads();
            let changes_before = backend.get_changes(&[]).len();

            backend.apply_changes(vec![change.clone()]).unwrap();

            prop_assert_eq!(backend.heads(), heads_before);
            prop_assert_eq!(backend.get_changes(&[]).len(), changes_before);
        }

        /// Two concurrent changes (both authored against the same seed, neither depending on
        /// the other) delivered in either order must converge to the same heads and the same
        /// encoded document (§8 convergence, §4.3's reordering tolerance).
        #[test]
        fn changes_converge_regardless_of_delivery_order(value_a in 0i64..1_000, value_b in 0i64..1_000) {
            let actor_a = ActorId::random();
            let actor_b = ActorId::random();

            let mut seed = Backend::new();
            seed.apply_local_change(actor_a.clone(), None, vec![set_op("seed", 0)]).unwrap();
            let seed_bytes = seed.save();

            let mut replica_a = Backend::load(&seed_bytes).unwrap();
            let (change_a, _) = replica_a
                .apply_local_change(actor_a, None, vec![set_op("x", value_a)])
                .unwrap();

            let mut replica_b = Backend::load(&seed_bytes).unwrap();
            let (change_b, _) = replica_b
                .apply_local_change(actor_b, None, vec![set_op("y", value_b)])
                .unwrap();

            let mut forward = Backend::load(&seed_bytes).unwrap();
            forward.apply_changes(vec![change_a.clone(), change_b.clone()]).unwrap();

            let mut backward = Backend::load(&seed_bytes).unwrap();
            backward.apply_changes(vec![change_b, change_a]).unwrap();

            prop_assert_eq!(forward.heads(), backward.heads());
            prop_assert_eq!(forward.save(), backward.save());
        }

        /// Applying more changes never loses a change already known (§8 monotonicity).
        #[test]
        fn known_change_count_is_monotonic(values in prop::collection::vec(0i64..1_000, 0..5)) {
            let mut backend = Backend::new();
            let actor = ActorId::random();
            let mut previous_len = backend.get_changes(&[]).len();
            for value in values {
                backend.apply_local_change(actor.clone(), None, vec![set_op("k", value)]).unwrap();
                let len = backend.get_changes(&[]).len();
                prop_assert!(len >= previous_len);
                previous_len = len;
            }
        }
    }
}
