//! The op model and on-the-wire value types shared by the engine and frontend crates:
//! actor/op/object ids, the CRDT value domain, the logical (pre-encoding) `Change` shape, and
//! the `Patch`/`Diff` types the engine emits and the frontend consumes.

mod actor_id;
mod change;
mod change_hash;
mod element_id;
mod error;
mod key;
mod object_id;
mod op;
mod op_id;
mod op_type;
mod patch;
mod value;

pub use actor_id::ActorId;
pub use change::Change;
pub use change_hash::ChangeHash;
pub use element_id::ElemId;
pub use error::{InvalidActorId, InvalidChangeHashSlice, InvalidOpId};
pub use key::Key;
pub use object_id::ObjId;
pub use op::Op;
pub use op_id::OpId;
pub use op_type::{ObjType, OpType};
pub use patch::{Diff, DiffEdit, ListDiff, MapDiff, Patch};
pub use value::ScalarValue;

#[cfg(test)]
mod proptests {
    use std::str::FromStr;

    use proptest::prelude::*;

    use crate::{ActorId, OpId, ScalarValue};

    fn actor_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 1..20)
    }

    proptest! {
        #[test]
        fn actor_id_hex_round_trips(bytes in actor_bytes()) {
            let actor = ActorId::from(bytes);
            let reparsed = ActorId::from_str(&actor.to_hex_string()).unwrap();
            prop_assert_eq!(reparsed, actor);
        }

        #[test]
        fn op_id_display_round_trips(counter in 0u64..1_000_000, bytes in actor_bytes()) {
            let id = OpId::new(counter, &ActorId::from(bytes));
            let reparsed = OpId::from_str(&id.to_string()).unwrap();
            prop_assert_eq!(reparsed, id);
        }

        #[test]
        fn op_id_ordering_follows_counter_then_actor(
            counter_a in 0u64..100, bytes_a in actor_bytes(),
            counter_b in 0u64..100, bytes_b in actor_bytes(),
        ) {
            let a = OpId::new(counter_a, &ActorId::from(bytes_a));
            let b = OpId::new(counter_b, &ActorId::from(bytes_b));
            let expected = counter_a.cmp(&counter_b).then_with(|| a.actor.cmp(&b.actor));
            prop_assert_eq!(a.cmp(&b), expected);
        }

        #[test]
        fn scalar_value_json_round_trips(n in any::<i64>(), s in ".*", flag in any::<bool>()) {
            // F64 is deliberately excluded: NaN != NaN would make the round-trip assertion flaky.
            for value in [
                ScalarValue::Int(n),
                ScalarValue::Str(s.into()),
                ScalarValue::Boolean(flag),
                ScalarValue::Counter(n),
                ScalarValue::Timestamp(n),
                ScalarValue::Null,
            ] {
                let json = serde_json::to_string(&value).unwrap();
                let back: ScalarValue = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(back, value);
            }
        }
    }
}
