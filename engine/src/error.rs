use thiserror::Error;
use weft_protocol::{ChangeHash, ObjId, OpId};

/// The error kinds from §7. `MissingDependency` is only ever returned by the strict entry
/// points (`History::insert_strict`, `Backend::apply_changes_strict`); the normal path parks
/// a change with unsatisfied deps silently rather than erroring, per the propagation policy.
#[derive(Error, Debug, PartialEq)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("duplicate sequence number {seq} for actor {actor}")]
    DuplicateSeq { actor: String, seq: u64 },
    #[error("missing dependency: {0}")]
    MissingDependency(ChangeHash),
    #[error("state mismatch: document deps do not match the patch being applied")]
    StateMismatch,
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("actor collision: {0}")]
    ActorCollision(String),
    #[error("op targets unknown object {0}")]
    DanglingReference(ObjId),
    #[error("op id {0} not currently active (predecessor already overridden)")]
    InvalidPred(OpId),
}

impl EngineError {
    pub fn decode(msg: impl Into<String>) -> Self {
        EngineError::DecodeError(msg.into())
    }
}
