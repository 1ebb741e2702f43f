use serde::{Deserialize, Serialize};

use crate::{actor_id::ActorId, change_hash::ChangeHash, op::Op};

/// The logical (pre-encoding) shape of a change, as produced by a change recorder. The
/// engine hashes and columnar-encodes this into its own wire-backed `Change` type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub actor: ActorId,
    pub seq: u64,
    pub start_op: u64,
    pub time: i64,
    pub message: Option<String>,
    pub deps: Vec<ChangeHash>,
    pub ops: Vec<Op>,
}
