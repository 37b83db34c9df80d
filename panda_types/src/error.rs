use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeError {
    #[error("value {0:?} is not a valid enum name")]
    InvalidEnumName(String),
    #[error("{0} is not a valid enum value")]
    InvalidEnumValue(u32),
    #[error("invalid lut expression: {0}")]
    InvalidLut(String),
    #[error("{0} is not a valid mux index")]
    InvalidMuxIndex(u32),
    #[error("{0:?} is not a valid mux name")]
    InvalidMuxName(String),
    #[error("{0:?} is not a valid value")]
    InvalidValue(String),
    #[error("type does not support scalar format/parse")]
    NotScalar,
    #[error("value {0} exceeds maximum {1}")]
    OutOfRange(u64, u64),
}
