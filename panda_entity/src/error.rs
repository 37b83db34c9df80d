use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
    #[error("capture bus overlap: {0} and {1} both claim {2}")]
    CaptureBusOverlap(String, String, String),
    #[error("index {0} out of range for block {1:?} ({2} instances)")]
    IndexOutOfRange(u32, String, u32),
    #[error("{0}")]
    Invalid(String),
    #[error("capture already in progress")]
    InvalidBusy,
    #[error("{0} has no attribute {1:?}")]
    NoSuchAttribute(String, String),
    #[error("no such block {0:?}")]
    NoSuchBlock(String),
    #[error("{0} has no field {1:?}")]
    NoSuchField(String, String),
    #[error("table write already in progress for {0}")]
    TableBusy(String),
    #[error(transparent)]
    Type(#[from] panda_types::TypeError),
    #[error("register for {0:?} assigned more than once")]
    UnassignedRegister(String),
}

pub type Result<T> = std::result::Result<T, EntityError>;
