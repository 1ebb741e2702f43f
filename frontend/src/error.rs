use thiserror::Error;
use weft_protocol::ObjId;

/// Mistakes a caller of the reference recorder/snapshot can make. Distinct from
/// [`weft_engine::EngineError`](weft_engine::EngineError): these never reach the engine, they're
/// caught resolving a path against the immutable [`Doc`](crate::Doc) snapshot before any op is
/// built.
#[derive(Error, Debug, PartialEq)]
pub enum FrontendError {
    #[error("no object with id {0}")]
    UnknownObject(ObjId),
    #[error("object {0} is not a map or table")]
    NotAMap(ObjId),
    #[error("object {0} is not a list or text")]
    NotAList(ObjId),
    #[error("key {0:?} not present")]
    KeyNotFound(String),
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("patch referenced an object outside the four known kinds")]
    InvalidPatch,
}
