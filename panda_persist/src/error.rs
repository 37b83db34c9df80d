use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Entity(#[from] panda_entity::EntityError),
    #[error("{0}:{1}: {2}")]
    Malformed(String, usize, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PersistError>;
