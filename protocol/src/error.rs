use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid actor id: {0}")]
pub struct InvalidActorId(pub String);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid op id: {0}")]
pub struct InvalidOpId(pub String);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid change hash slice of length {0}", .0.len())]
pub struct InvalidChangeHashSlice(pub Vec<u8>);
