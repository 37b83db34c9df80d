use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error(transparent)]
    Capture(#[from] panda_capture::CaptureError),
    #[error(transparent)]
    Entity(#[from] panda_entity::EntityError),
    #[error("{0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
