use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// The dynamic value domain: a tagged union, per design note §9. `Counter` and `Timestamp`
/// are distinct variants rather than a separate `datatype` tag on `Int`, so the type system
/// rules out a counter/timestamp that forgot to be annotated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int(i64),
    F64(f64),
    Str(SmolStr),
    Counter(i64),
    Timestamp(i64),
}

impl ScalarValue {
    pub fn is_counter(&self) -> bool {
        matches!(self, ScalarValue::Counter(_))
    }

    /// The additive value carried by ops that may be the target of `inc`.
    pub fn counter_value(&self) -> Option<i64> {
        match self {
            ScalarValue::Counter(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Str(s.into())
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::F64(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}
